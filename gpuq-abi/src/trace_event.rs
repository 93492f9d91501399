//! Trace event stream discriminants. Every record in the
//! trace ring begins with one of these as its first byte.

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEventKind {
    ZoneBegin = 0,
    ZoneEnd = 1,
    ZoneValueI64 = 2,
    ZoneValueTextLiteral = 3,
    ZoneValueTextDynamic = 4,
    PlotConfig = 5,
    PlotValueI64 = 6,
    ExecutionZoneBegin = 7,
    ExecutionZoneEnd = 8,
    ExecutionZoneNotify = 9,
    ExecutionZoneDispatch = 10,
    MemoryAlloc = 11,
    MemoryFree = 12,
    MessageLiteral = 13,
    MessageDynamic = 14,
}

impl TraceEventKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::ZoneBegin,
            1 => Self::ZoneEnd,
            2 => Self::ZoneValueI64,
            3 => Self::ZoneValueTextLiteral,
            4 => Self::ZoneValueTextDynamic,
            5 => Self::PlotConfig,
            6 => Self::PlotValueI64,
            7 => Self::ExecutionZoneBegin,
            8 => Self::ExecutionZoneEnd,
            9 => Self::ExecutionZoneNotify,
            10 => Self::ExecutionZoneDispatch,
            11 => Self::MemoryAlloc,
            12 => Self::MemoryFree,
            13 => Self::MessageLiteral,
            14 => Self::MessageDynamic,
            _ => return None,
        })
    }
}
