//! Command record layout: the 64-byte discriminated union the recorder
//! writes into a command block and the issue engine reads back. Modeled as
//! a tagged Rust enum whose encoding matches the 64-byte layout, with a
//! manual `Encode`/`Decode` pair (grounded on
//! `panda-abi::encoding`) standing in for the union's raw byte layout.

use crate::encoding::{Decoder, Encoder, DecodeError};

/// Size in bytes of every command record, regardless of variant.
pub const RECORD_SIZE: usize = 64;
const HEADER_SIZE: usize = 4;
const BODY_SIZE: usize = RECORD_SIZE - HEADER_SIZE;

/// Maximum inline wait-event ordinals a single `WAIT_EVENTS` record holds
/// before overflowing to a second chained record.
pub const MAX_INLINE_WAIT_EVENTS: usize = 5;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    DebugGroupBegin = 0,
    DebugGroupEnd = 1,
    Barrier = 2,
    SignalEvent = 3,
    ResetEvent = 4,
    WaitEvents = 5,
    FillBuffer = 6,
    CopyBuffer = 7,
    DispatchDirect = 8,
    DispatchIndirectStatic = 9,
    DispatchIndirectDynamic = 10,
    Branch = 11,
    Return = 12,
}

impl CommandType {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::DebugGroupBegin,
            1 => Self::DebugGroupEnd,
            2 => Self::Barrier,
            3 => Self::SignalEvent,
            4 => Self::ResetEvent,
            5 => Self::WaitEvents,
            6 => Self::FillBuffer,
            7 => Self::CopyBuffer,
            8 => Self::DispatchDirect,
            9 => Self::DispatchIndirectStatic,
            10 => Self::DispatchIndirectDynamic,
            11 => Self::Branch,
            12 => Self::Return,
            _ => return None,
        })
    }
}

/// First 4 bytes of every command record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub cmd_type: u8,
    pub flags: u8,
    /// Offset, in packets, from the block's `base_queue_index`.
    pub packet_offset: u16,
}

/// A resolved fill pattern, 1/2/4/8 bytes wide (the `fill_xN` family of
/// fill commands).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillPattern {
    pub bytes: [u8; 8],
    pub len: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBody {
    DebugGroup {
        source_location: u64,
    },
    Barrier,
    SignalEvent {
        event_ordinal: u32,
    },
    ResetEvent {
        event_ordinal: u32,
    },
    WaitEvents {
        count: u8,
        ordinals: [u32; MAX_INLINE_WAIT_EVENTS],
        /// Offset into the block's embedded data where ordinals past the
        /// first `MAX_INLINE_WAIT_EVENTS` continue, as consecutive
        /// little-endian `u32`s. Unused (and unread) when `count <=
        /// MAX_INLINE_WAIT_EVENTS`.
        overflow_ref: u32,
    },
    FillBuffer {
        target_ref: u32,
        length: u64,
        pattern: FillPattern,
        kernarg_offset: u32,
    },
    CopyBuffer {
        source_ref: u32,
        target_ref: u32,
        length: u64,
        kernarg_offset: u32,
    },
    DispatchDirect {
        kernel_ref: u32,
        grid_size: [u32; 3],
        workgroup_size: [u16; 3],
        kernarg_offset: u32,
        binding_table_offset: u32,
        binding_count: u16,
    },
    DispatchIndirectStatic {
        kernel_ref: u32,
        grid_size_ref: u32,
        workgroup_size: [u16; 3],
        kernarg_offset: u32,
        binding_table_offset: u32,
        binding_count: u16,
    },
    DispatchIndirectDynamic {
        kernel_ref: u32,
        workgroups_ref: u32,
        workgroup_size: [u16; 3],
        kernarg_offset: u32,
        binding_table_offset: u32,
        binding_count: u16,
    },
    Branch {
        target_block: u32,
    },
    Return,
}

impl CommandBody {
    /// Number of AQL packets this command contributes to its block, used to
    /// validate `packet_offset + aql_packet_count <= max_packet_count`
    /// and to size the reserved packet range.
    pub fn aql_packet_count(&self) -> u32 {
        match self {
            CommandBody::WaitEvents { count, .. } => {
                (*count as u32).div_ceil(MAX_INLINE_WAIT_EVENTS as u32).max(1)
            }
            CommandBody::DispatchIndirectDynamic { .. } => 2,
            CommandBody::Branch { .. } => 0,
            _ => 1,
        }
    }

    pub fn command_type(&self) -> CommandType {
        match self {
            CommandBody::DebugGroup { .. } => CommandType::DebugGroupBegin,
            CommandBody::Barrier => CommandType::Barrier,
            CommandBody::SignalEvent { .. } => CommandType::SignalEvent,
            CommandBody::ResetEvent { .. } => CommandType::ResetEvent,
            CommandBody::WaitEvents { .. } => CommandType::WaitEvents,
            CommandBody::FillBuffer { .. } => CommandType::FillBuffer,
            CommandBody::CopyBuffer { .. } => CommandType::CopyBuffer,
            CommandBody::DispatchDirect { .. } => CommandType::DispatchDirect,
            CommandBody::DispatchIndirectStatic { .. } => CommandType::DispatchIndirectStatic,
            CommandBody::DispatchIndirectDynamic { .. } => CommandType::DispatchIndirectDynamic,
            CommandBody::Branch { .. } => CommandType::Branch,
            CommandBody::Return => CommandType::Return,
        }
    }

    fn encode(&self, enc: &mut Encoder) {
        match self {
            CommandBody::DebugGroup { source_location } => enc.write_u64(*source_location),
            CommandBody::Barrier | CommandBody::Return => {}
            CommandBody::SignalEvent { event_ordinal } | CommandBody::ResetEvent { event_ordinal } => {
                enc.write_u32(*event_ordinal)
            }
            CommandBody::WaitEvents { count, ordinals, overflow_ref } => {
                enc.write_u8(*count);
                for ordinal in ordinals {
                    enc.write_u32(*ordinal);
                }
                enc.write_u32(*overflow_ref);
            }
            CommandBody::FillBuffer {
                target_ref,
                length,
                pattern,
                kernarg_offset,
            } => {
                enc.write_u32(*target_ref);
                enc.write_u64(*length);
                enc.write_bytes(&pattern.bytes);
                enc.write_u8(pattern.len);
                enc.write_u32(*kernarg_offset);
            }
            CommandBody::CopyBuffer {
                source_ref,
                target_ref,
                length,
                kernarg_offset,
            } => {
                enc.write_u32(*source_ref);
                enc.write_u32(*target_ref);
                enc.write_u64(*length);
                enc.write_u32(*kernarg_offset);
            }
            CommandBody::DispatchDirect {
                kernel_ref,
                grid_size,
                workgroup_size,
                kernarg_offset,
                binding_table_offset,
                binding_count,
            } => {
                enc.write_u32(*kernel_ref);
                for v in grid_size {
                    enc.write_u32(*v);
                }
                for v in workgroup_size {
                    enc.write_u16(*v);
                }
                enc.write_u32(*kernarg_offset);
                enc.write_u32(*binding_table_offset);
                enc.write_u16(*binding_count);
            }
            CommandBody::DispatchIndirectStatic {
                kernel_ref,
                grid_size_ref,
                workgroup_size,
                kernarg_offset,
                binding_table_offset,
                binding_count,
            } => {
                enc.write_u32(*kernel_ref);
                enc.write_u32(*grid_size_ref);
                for v in workgroup_size {
                    enc.write_u16(*v);
                }
                enc.write_u32(*kernarg_offset);
                enc.write_u32(*binding_table_offset);
                enc.write_u16(*binding_count);
            }
            CommandBody::DispatchIndirectDynamic {
                kernel_ref,
                workgroups_ref,
                workgroup_size,
                kernarg_offset,
                binding_table_offset,
                binding_count,
            } => {
                enc.write_u32(*kernel_ref);
                enc.write_u32(*workgroups_ref);
                for v in workgroup_size {
                    enc.write_u16(*v);
                }
                enc.write_u32(*kernarg_offset);
                enc.write_u32(*binding_table_offset);
                enc.write_u16(*binding_count);
            }
            CommandBody::Branch { target_block } => enc.write_u32(*target_block),
        }
    }

    fn decode(cmd_type: CommandType, dec: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(match cmd_type {
            CommandType::DebugGroupBegin | CommandType::DebugGroupEnd => CommandBody::DebugGroup {
                source_location: dec.read_u64()?,
            },
            CommandType::Barrier => CommandBody::Barrier,
            CommandType::SignalEvent => CommandBody::SignalEvent {
                event_ordinal: dec.read_u32()?,
            },
            CommandType::ResetEvent => CommandBody::ResetEvent {
                event_ordinal: dec.read_u32()?,
            },
            CommandType::WaitEvents => {
                let count = dec.read_u8()?;
                let mut ordinals = [0u32; MAX_INLINE_WAIT_EVENTS];
                for slot in ordinals.iter_mut() {
                    *slot = dec.read_u32()?;
                }
                let overflow_ref = dec.read_u32()?;
                CommandBody::WaitEvents { count, ordinals, overflow_ref }
            }
            CommandType::FillBuffer => {
                let target_ref = dec.read_u32()?;
                let length = dec.read_u64()?;
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(dec.read_bytes(8)?);
                let len = dec.read_u8()?;
                let kernarg_offset = dec.read_u32()?;
                CommandBody::FillBuffer {
                    target_ref,
                    length,
                    pattern: FillPattern { bytes, len },
                    kernarg_offset,
                }
            }
            CommandType::CopyBuffer => CommandBody::CopyBuffer {
                source_ref: dec.read_u32()?,
                target_ref: dec.read_u32()?,
                length: dec.read_u64()?,
                kernarg_offset: dec.read_u32()?,
            },
            CommandType::DispatchDirect => {
                let kernel_ref = dec.read_u32()?;
                let grid_size = [dec.read_u32()?, dec.read_u32()?, dec.read_u32()?];
                let workgroup_size = [dec.read_u16()?, dec.read_u16()?, dec.read_u16()?];
                let kernarg_offset = dec.read_u32()?;
                let binding_table_offset = dec.read_u32()?;
                let binding_count = dec.read_u16()?;
                CommandBody::DispatchDirect {
                    kernel_ref,
                    grid_size,
                    workgroup_size,
                    kernarg_offset,
                    binding_table_offset,
                    binding_count,
                }
            }
            CommandType::DispatchIndirectStatic => {
                let kernel_ref = dec.read_u32()?;
                let grid_size_ref = dec.read_u32()?;
                let workgroup_size = [dec.read_u16()?, dec.read_u16()?, dec.read_u16()?];
                let kernarg_offset = dec.read_u32()?;
                let binding_table_offset = dec.read_u32()?;
                let binding_count = dec.read_u16()?;
                CommandBody::DispatchIndirectStatic {
                    kernel_ref,
                    grid_size_ref,
                    workgroup_size,
                    kernarg_offset,
                    binding_table_offset,
                    binding_count,
                }
            }
            CommandType::DispatchIndirectDynamic => {
                let kernel_ref = dec.read_u32()?;
                let workgroups_ref = dec.read_u32()?;
                let workgroup_size = [dec.read_u16()?, dec.read_u16()?, dec.read_u16()?];
                let kernarg_offset = dec.read_u32()?;
                let binding_table_offset = dec.read_u32()?;
                let binding_count = dec.read_u16()?;
                CommandBody::DispatchIndirectDynamic {
                    kernel_ref,
                    workgroups_ref,
                    workgroup_size,
                    kernarg_offset,
                    binding_table_offset,
                    binding_count,
                }
            }
            CommandType::Branch => CommandBody::Branch {
                target_block: dec.read_u32()?,
            },
            CommandType::Return => CommandBody::Return,
        })
    }
}

/// A full 64-byte command record: header plus variant body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecord {
    pub flags: u8,
    pub packet_offset: u16,
    pub body: CommandBody,
}

impl CommandRecord {
    pub fn new(flags: u8, packet_offset: u16, body: CommandBody) -> Self {
        Self { flags, packet_offset, body }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut raw = [0u8; RECORD_SIZE];
        raw[0] = self.body.command_type() as u8;
        raw[1] = self.flags;
        raw[2..4].copy_from_slice(&self.packet_offset.to_le_bytes());
        let mut enc = Encoder::new(&mut raw[HEADER_SIZE..]);
        self.body.encode(&mut enc);
        raw
    }

    pub fn from_bytes(raw: &[u8; RECORD_SIZE]) -> Result<Self, DecodeError> {
        let cmd_type = CommandType::from_u8(raw[0]).ok_or(DecodeError::Truncated)?;
        let flags = raw[1];
        let packet_offset = u16::from_le_bytes([raw[2], raw[3]]);
        let mut dec = Decoder::new(&raw[HEADER_SIZE..]);
        let body = CommandBody::decode(cmd_type, &mut dec)?;
        Ok(Self { flags, packet_offset, body })
    }
}

const _: () = assert!(BODY_SIZE == 60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_direct_round_trips() {
        let record = CommandRecord::new(
            0,
            3,
            CommandBody::DispatchDirect {
                kernel_ref: 7,
                grid_size: [64, 1, 1],
                workgroup_size: [32, 1, 1],
                kernarg_offset: 256,
                binding_table_offset: 0,
                binding_count: 2,
            },
        );
        let raw = record.to_bytes();
        let back = CommandRecord::from_bytes(&raw).unwrap();
        assert_eq!(record, back);
        assert_eq!(back.body.aql_packet_count(), 1);
    }

    #[test]
    fn indirect_dynamic_dispatch_counts_two_packets() {
        let body = CommandBody::DispatchIndirectDynamic {
            kernel_ref: 1,
            workgroups_ref: 2,
            workgroup_size: [8, 8, 1],
            kernarg_offset: 0,
            binding_table_offset: 0,
            binding_count: 0,
        };
        assert_eq!(body.aql_packet_count(), 2);
    }

    #[test]
    fn wait_events_overflow_expands_to_two_packets() {
        let body = CommandBody::WaitEvents {
            count: 7,
            ordinals: [1, 2, 3, 4, 5],
            overflow_ref: 0,
        };
        assert_eq!(body.aql_packet_count(), 2);
    }

    #[test]
    fn wait_events_round_trips_with_overflow_ref() {
        let record = CommandRecord::new(
            0,
            0,
            CommandBody::WaitEvents {
                count: 7,
                ordinals: [1, 2, 3, 4, 5],
                overflow_ref: 128,
            },
        );
        let raw = record.to_bytes();
        let back = CommandRecord::from_bytes(&raw).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn branch_contributes_no_packets() {
        let body = CommandBody::Branch { target_block: 3 };
        assert_eq!(body.aql_packet_count(), 0);
    }

    #[test]
    fn fill_buffer_round_trips() {
        let record = CommandRecord::new(
            0,
            0,
            CommandBody::FillBuffer {
                target_ref: 4,
                length: 4096,
                pattern: FillPattern { bytes: [0xAA; 8], len: 4 },
                kernarg_offset: 128,
            },
        );
        let raw = record.to_bytes();
        let back = CommandRecord::from_bytes(&raw).unwrap();
        assert_eq!(record, back);
    }
}
