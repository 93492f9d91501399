//! Device→host agent-dispatch channel: release refs, report
//! errors, notify signal advances, and ask for a trace flush.

use core::sync::atomic::Ordering;

use gpuq_abi::{AgentDispatchPacket, FenceScope, HostCallKind, PacketHeader, PacketKind, SignalHandle, NULL_SIGNAL};

use crate::aql_queue::AqlQueue;
use crate::error::CoreError;

pub struct HostPostChannel {
    queue: AqlQueue,
}

impl HostPostChannel {
    pub fn new(size: u64, id: u32) -> Self {
        Self {
            queue: AqlQueue::new(size, id),
        }
    }

    /// Reserves a slot, writes the agent-dispatch payload, publishes the
    /// header with `barrier=1, acquire=SYSTEM, release=SYSTEM` (the
    /// conservative scope so the host observes any prior device writes),
    /// then rings the doorbell.
    fn post(&self, call: HostCallKind, return_address: u64, args: [u64; 4], completion_signal: SignalHandle) -> u64 {
        let index = self.queue.reserve(1);
        let header = PacketHeader::new(PacketKind::AgentDispatch, true, FenceScope::System, FenceScope::System);
        let packet = AgentDispatchPacket {
            header: header.to_bits(),
            call_type: call as u16,
            reserved0: 0,
            return_address,
            arg: args,
            reserved2: 0,
            completion_signal,
        };
        self.queue.emplace(index, &packet);
        self.queue.doorbell.store(self.queue.load_write_index(Ordering::Relaxed), Ordering::Relaxed);
        index
    }

    pub fn post_release(&self, resources: [u64; 4], completion_signal: SignalHandle) -> u64 {
        self.post(HostCallKind::PostRelease, 0, resources, completion_signal)
    }

    /// Null completion signal — the device is considered lost after this,
    /// so there is nothing left to wake.
    pub fn post_error(&self, error: &CoreError) -> u64 {
        let (call, code, arg0, arg1) = error.code_and_args();
        self.post(call, code as u64, [arg0, arg1, 0, 0], NULL_SIGNAL)
    }

    /// Ordering is not guaranteed; the host must tolerate stale
    /// notifications. Semaphore backing storage and host-side listener
    /// registration live outside the core, so nothing here calls this; it's
    /// the wrapper external callers reach for when a semaphore they manage
    /// needs to notify the host.
    pub fn post_signal(&self, semaphore: u32, payload: i64) -> u64 {
        self.post(HostCallKind::PostSignal, 0, [semaphore as u64, payload as u64, 0, 0], NULL_SIGNAL)
    }

    pub fn post_trace_flush(&self, trace_buffer_id: u32, completion_signal: SignalHandle) -> u64 {
        self.post(HostCallKind::PostTraceFlush, 0, [trace_buffer_id as u64, 0, 0, 0], completion_signal)
    }

    pub fn post_pool_grow(&self, requested_bytes: u64, completion_signal: SignalHandle) -> u64 {
        self.post(HostCallKind::PoolGrow, 0, [requested_bytes, 0, 0, 0], completion_signal)
    }

    /// Reads back a posted packet, used by tests and the demo's simulated
    /// host loop.
    pub fn peek(&self, index: u64) -> gpuq_abi::RawPacket {
        self.queue.read_raw(index)
    }

    pub fn load_write_index(&self, order: Ordering) -> u64 {
        self.queue.load_write_index(order)
    }

    pub fn advance_read_index(&self, new_value: u64, order: Ordering) {
        self.queue.advance_read_index(new_value, order);
    }
}
