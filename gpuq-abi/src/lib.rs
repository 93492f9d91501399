//! Wire-exact layouts shared between the device core and the host: AQL
//! packet formats, command records, the host-call enum, and the trace
//! event discriminants. No scheduling or issue logic lives here
//! — that is `gpuq-core`'s job, mirroring the split between
//! `panda-abi` (layouts, handle encoding, the wire TLV codec) and
//! `panda-kernel` (everything that acts on them).

#![cfg_attr(not(feature = "std"), no_std)]

pub mod command;
pub mod encoding;
pub mod hostcall;
pub mod packet;
pub mod trace_event;

pub use command::{CommandBody, CommandHeader, CommandRecord, CommandType, MAX_INLINE_WAIT_EVENTS};
pub use hostcall::{ErrorCode, ExhaustedResource, HostCallKind};
pub use packet::{
    AgentDispatchPacket, BarrierPacket, FenceScope, KernelDispatchPacket, PacketHeader, PacketKind,
    RawPacket, SignalHandle, INVALID_PACKET, NULL_SIGNAL, PACKET_SIZE,
};
pub use trace_event::TraceEventKind;
