//! Device→host call taxonomy carried in the agent-dispatch packet's `type`
//! field.

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCallKind {
    PoolGrow = 0,
    PoolTrim = 1,
    PostRelease = 2,
    PostError = 3,
    PostSignal = 4,
    PostTraceFlush = 5,
}

impl HostCallKind {
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0 => Self::PoolGrow,
            1 => Self::PoolTrim,
            2 => Self::PostRelease,
            3 => Self::PostError,
            4 => Self::PostSignal,
            5 => Self::PostTraceFlush,
            _ => return None,
        })
    }
}

/// `arg0` of a `POST_ERROR` call: which fixed-capacity table was exhausted.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustedResource {
    SignalPool = 0,
    WakePool = 1,
    ExecutionQueue = 2,
    HostPostQueue = 3,
    KernargScratch = 4,
}

/// `code` distinguishing the two `POST_ERROR` shapes.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Exhausted = 0,
    Malformed = 1,
}
