//! Device-originated error taxonomy.
//!
//! Mirrors the small `#[derive(Debug, Clone, Copy, PartialEq, Eq)]` enum
//! style `resource/block.rs`'s `BlockError` and `vfs/mod.rs`'s `FsError`
//! use: one flat enum, no nested `Box<dyn Error>`, propagated with
//! `Result` and `?`.

use gpuq_abi::{ErrorCode, ExhaustedResource, HostCallKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// A fixed-capacity table could not satisfy a request.
    Exhausted {
        resource: ExhaustedResource,
        capacity: u32,
    },
    /// The issue engine found a recorder violation.
    Malformed { cmd_type: u8, ordinal: u32 },
}

impl CoreError {
    /// The `POST_ERROR` call shape for this error: error code plus the two
    /// 64-bit args the host receives as `arg0`/`arg1`.
    pub fn code_and_args(&self) -> (HostCallKind, ErrorCode, u64, u64) {
        match *self {
            CoreError::Exhausted { resource, capacity } => {
                (HostCallKind::PostError, ErrorCode::Exhausted, resource as u64, capacity as u64)
            }
            CoreError::Malformed { cmd_type, ordinal } => {
                (HostCallKind::PostError, ErrorCode::Malformed, cmd_type as u64, ordinal as u64)
            }
        }
    }
}

impl core::fmt::Display for CoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CoreError::Exhausted { resource, capacity } => {
                write!(f, "resource exhausted: {resource:?} (capacity {capacity})")
            }
            CoreError::Malformed { cmd_type, ordinal } => {
                write!(f, "malformed command: type={cmd_type} ordinal={ordinal}")
            }
        }
    }
}
