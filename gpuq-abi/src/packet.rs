//! AQL packet header and the three concrete 64-byte packet layouts.
//!
//! These mirror the wire format's bit-exact layouts. Each packet type derives
//! `zerocopy`'s `FromBytes`/`IntoBytes`/`Immutable`/`KnownLayout` the same
//! way `virtio-drivers/src/device/gpu.rs` derives them for its own wire
//! structures, so a packet can be
//! written directly into a ring slot with `.write_to(slice)` and read back
//! with `.read_from(slice)` — no field-by-field encode/decode needed.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size in bytes of every AQL packet, regardless of type.
pub const PACKET_SIZE: usize = 64;

/// The `type` discriminant occupying the low 8 bits of the packet header.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Vendor = 0,
    Invalid = 1,
    KernelDispatch = 2,
    BarrierAnd = 3,
    AgentDispatch = 4,
    BarrierOr = 5,
}

impl PacketKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Vendor),
            1 => Some(Self::Invalid),
            2 => Some(Self::KernelDispatch),
            3 => Some(Self::BarrierAnd),
            4 => Some(Self::AgentDispatch),
            5 => Some(Self::BarrierOr),
            _ => None,
        }
    }
}

/// Visibility radius of a packet's memory acquire/release.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceScope {
    None = 0,
    Agent = 1,
    System = 2,
}

impl FenceScope {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Agent,
            2 => Self::System,
            _ => Self::None,
        }
    }
}

/// Bit layout (LSB first): `type[7:0] | barrier[8] | acquire[10:9] | release[12:11] | reserved[15:13]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: PacketKind,
    pub barrier_bit: bool,
    pub acquire_scope: FenceScope,
    pub release_scope: FenceScope,
}

impl PacketHeader {
    pub const INVALID: u16 = PacketKind::Invalid as u16;

    pub fn new(kind: PacketKind, barrier_bit: bool, acquire: FenceScope, release: FenceScope) -> Self {
        Self {
            kind,
            barrier_bit,
            acquire_scope: acquire,
            release_scope: release,
        }
    }

    /// Pack into the raw little-endian `u16` the hardware reads.
    pub fn to_bits(self) -> u16 {
        let mut bits = self.kind as u16;
        if self.barrier_bit {
            bits |= 1 << 8;
        }
        bits |= (self.acquire_scope as u16) << 9;
        bits |= (self.release_scope as u16) << 11;
        bits
    }

    /// Unpack a raw header `u16`. An unrecognized `type` decodes as `Vendor`
    /// rather than failing — the issue engine treats unknown kinds as a
    /// recorder-violation error, not a panic here.
    pub fn from_bits(bits: u16) -> Self {
        let kind = PacketKind::from_u8((bits & 0xFF) as u8).unwrap_or(PacketKind::Vendor);
        let barrier_bit = (bits >> 8) & 0x1 != 0;
        let acquire_scope = FenceScope::from_u8(((bits >> 9) & 0x3) as u8);
        let release_scope = FenceScope::from_u8(((bits >> 11) & 0x3) as u8);
        Self {
            kind,
            barrier_bit,
            acquire_scope,
            release_scope,
        }
    }
}

/// A signal handle as it appears embedded in a packet: zero is the null signal.
pub type SignalHandle = u64;

pub const NULL_SIGNAL: SignalHandle = 0;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct KernelDispatchPacket {
    pub header: u16,
    pub setup: u16,
    pub workgroup_size: [u16; 3],
    pub reserved0: u16,
    pub grid_size: [u32; 3],
    pub private_segment_size: u32,
    pub group_segment_size: u32,
    pub kernel_object: u64,
    pub kernarg_address: u64,
    pub reserved2: u64,
    pub completion_signal: SignalHandle,
}

const _: () = assert!(core::mem::size_of::<KernelDispatchPacket>() == PACKET_SIZE);

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct AgentDispatchPacket {
    pub header: u16,
    pub call_type: u16,
    pub reserved0: u32,
    pub return_address: u64,
    pub arg: [u64; 4],
    pub reserved2: u64,
    pub completion_signal: SignalHandle,
}

const _: () = assert!(core::mem::size_of::<AgentDispatchPacket>() == PACKET_SIZE);

/// Shared layout for `BARRIER_AND` and `BARRIER_OR` (the header's `kind`
/// distinguishes the wait semantics; the body is identical).
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BarrierPacket {
    pub header: u16,
    pub reserved0: u16,
    pub reserved1: u32,
    pub dep_signal: [SignalHandle; 5],
    pub reserved2: u64,
    pub completion_signal: SignalHandle,
}

const _: () = assert!(core::mem::size_of::<BarrierPacket>() == PACKET_SIZE);

impl BarrierPacket {
    /// An empty barrier packet (no dependency signals) with the given
    /// completion signal and barrier bit, used for straight-line ordering
    /// by the BARRIER and DEBUG_GROUP issuers.
    pub fn empty(barrier_bit: bool, acquire: FenceScope, release: FenceScope, completion_signal: SignalHandle) -> Self {
        Self {
            header: PacketHeader::new(PacketKind::BarrierAnd, barrier_bit, acquire, release).to_bits(),
            reserved0: 0,
            reserved1: 0,
            dep_signal: [NULL_SIGNAL; 5],
            reserved2: 0,
            completion_signal,
        }
    }
}

/// Raw packet storage: every ring slot is exactly this many bytes.
pub type RawPacket = [u8; PACKET_SIZE];

pub const INVALID_PACKET: RawPacket = {
    let mut bytes = [0u8; PACKET_SIZE];
    bytes[0] = PacketKind::Invalid as u8;
    bytes
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let h = PacketHeader::new(PacketKind::KernelDispatch, true, FenceScope::Agent, FenceScope::System);
        let bits = h.to_bits();
        let back = PacketHeader::from_bits(bits);
        assert_eq!(back, h);
    }

    #[test]
    fn invalid_header_is_type_one() {
        assert_eq!(PacketHeader::INVALID, 1);
        assert_eq!(INVALID_PACKET[0], 1);
    }

    #[test]
    fn packet_sizes_are_64_bytes() {
        assert_eq!(core::mem::size_of::<KernelDispatchPacket>(), 64);
        assert_eq!(core::mem::size_of::<AgentDispatchPacket>(), 64);
        assert_eq!(core::mem::size_of::<BarrierPacket>(), 64);
    }
}
