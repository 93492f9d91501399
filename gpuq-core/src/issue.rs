//! Command-buffer issue engine: translates one command block's
//! records into AQL packets on the execution queue.
//!
//! The per-block issue is data-parallel by design: one work-item per
//! command, writing only to disjoint packet slots and kernarg regions. This
//! port issues a block with a plain sequential loop over its commands —
//! the per-command issue targets are already disjoint by the recorder's
//! invariant that command order within a block never aliases packet
//! ranges, so a genuine parallel dispatch would be safe, but nothing in a
//! host-side simulation needs the concurrency itself.

use alloc::sync::Arc;
use alloc::vec::Vec;

use gpuq_abi::{
    BarrierPacket, CommandBody, FenceScope, KernelDispatchPacket, PacketHeader, PacketKind, SignalHandle,
    TraceEventKind, MAX_INLINE_WAIT_EVENTS, NULL_SIGNAL,
};

use crate::aql_queue::AqlQueue;
use crate::atomics::SteadyClock;
use crate::command_buffer::{CommandBlock, CommandBuffer, QueryIds};
use crate::error::CoreError;
use crate::signal::SignalId;
use crate::signal_pool::SignalPool;
use crate::trace::{write_trace_event, QueryRing, TraceRingBuffer};

/// How much timing detail the execution was asked to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TraceMode {
    None = 0,
    Serialization = 1,
    Control = 2,
    Dispatch = 3,
}

/// Sentinel `kernel_object` values for the builtin kernels this engine
/// synthesizes itself (fill/copy/indirect-dispatch fixup) rather than
/// resolving through `ExecutionState::kernels`.
mod builtin {
    pub const FILL_X1: u64 = u64::MAX;
    pub const FILL_X2: u64 = u64::MAX - 1;
    pub const FILL_X4: u64 = u64::MAX - 2;
    pub const FILL_X8: u64 = u64::MAX - 3;
    pub const COPY_X1: u64 = u64::MAX - 4;
    pub const COPY_X2: u64 = u64::MAX - 5;
    pub const COPY_X4: u64 = u64::MAX - 6;
    pub const COPY_X8: u64 = u64::MAX - 7;
    pub const WORKGROUP_COUNT_UPDATE: u64 = u64::MAX - 8;
}

/// Mutable, per-in-flight-execution state. Reused across the
/// blocks of one execution since only one block runs at a time.
pub struct ExecutionState {
    pub trace_mode: TraceMode,
    pub command_buffer: Arc<CommandBuffer>,
    pub execution_queue: Arc<AqlQueue>,
    pub trace_buffer: Arc<TraceRingBuffer>,
    /// Query signals acquired for the block currently being issued.
    pub trace_block_query_base_ids: Vec<SignalId>,
    pub control_kernarg_storage: Vec<u8>,
    pub execution_kernarg_storage: Vec<u8>,
    /// Resolved binding-table values (opaque device addresses), indexed by
    /// a command's `binding_table_offset`.
    pub bindings: Vec<u64>,
    /// User-recorded kernel object handles, indexed by `kernel_ref`.
    pub kernels: Vec<u64>,
    /// Per-execution event table.
    pub events: Vec<SignalId>,
    /// The execution's top-level completion signal, signaled by RETURN.
    pub completion_signal: SignalId,
}

impl ExecutionState {
    pub fn new(
        command_buffer: Arc<CommandBuffer>,
        execution_queue: Arc<AqlQueue>,
        trace_buffer: Arc<TraceRingBuffer>,
        trace_mode: TraceMode,
        event_count: usize,
        completion_signal: SignalId,
    ) -> Self {
        let kernarg_capacity = command_buffer.max_kernarg_capacity as usize;
        Self {
            trace_mode,
            command_buffer,
            execution_queue,
            trace_buffer,
            trace_block_query_base_ids: Vec::new(),
            control_kernarg_storage: alloc::vec![0u8; kernarg_capacity],
            execution_kernarg_storage: alloc::vec![0u8; kernarg_capacity],
            bindings: Vec::new(),
            kernels: Vec::new(),
            events: alloc::vec![0; event_count],
            completion_signal,
        }
    }

    fn query_signal(&self, ids: &QueryIds) -> Option<SignalId> {
        let offset = match self.trace_mode {
            TraceMode::Dispatch => ids.dispatch_id.or(ids.control_id),
            TraceMode::Control => ids.control_id,
            TraceMode::Serialization | TraceMode::None => None,
        }?;
        self.trace_block_query_base_ids.get(offset as usize).copied()
    }
}

/// What the scheduler should do once a block finishes issuing.
pub enum IssueOutcome {
    /// The block ran to its end without a BRANCH/RETURN.
    Continue,
    Branch { target_block: u32 },
    Return,
}

fn fence_scopes_from_flags(flags: u8) -> (FenceScope, FenceScope) {
    (FenceScope::from_u8(flags & 0x3), FenceScope::from_u8((flags >> 2) & 0x3))
}

fn write_kernarg(storage: &mut [u8], offset: u32, bytes: &[u8], ordinal: u32, cmd_type: u8) -> Result<(), CoreError> {
    let start = offset as usize;
    let end = start + bytes.len();
    if end > storage.len() {
        return Err(CoreError::Malformed { cmd_type, ordinal });
    }
    storage[start..end].copy_from_slice(bytes);
    Ok(())
}

fn resolve_binding(state: &ExecutionState, slot: u32, ordinal: u32, cmd_type: u8) -> Result<u64, CoreError> {
    state
        .bindings
        .get(slot as usize)
        .copied()
        .ok_or(CoreError::Malformed { cmd_type, ordinal })
}

/// Issues every command in `block`, writing packets at
/// `base_queue_index + packet_offset`. Stops early and reports
/// control transfer on BRANCH/RETURN.
pub fn issue_block(
    state: &mut ExecutionState,
    signal_pool: &SignalPool,
    query_ring: &QueryRing,
    clock: &dyn SteadyClock,
    block: &CommandBlock,
    block_ordinal: u32,
    base_queue_index: u64,
) -> Result<IssueOutcome, CoreError> {
    let query_count = match state.trace_mode {
        TraceMode::Dispatch => block.query_map.max_dispatch_query_count,
        TraceMode::Control => block.query_map.max_control_query_count,
        TraceMode::Serialization | TraceMode::None => 0,
    };
    state.trace_block_query_base_ids = if query_count > 0 {
        query_ring.acquire(signal_pool, query_count)?
    } else {
        Vec::new()
    };

    for (index, command) in block.commands.iter().enumerate() {
        let queue_index = base_queue_index + command.packet_offset as u64;
        let query_ids = block.query_ids.get(index).copied().unwrap_or_default();
        let ordinal = index as u32;
        let cmd_type = command.body.command_type() as u8;

        match &command.body {
            CommandBody::DebugGroup { source_location } => {
                issue_debug_group(state, queue_index, command.flags, *source_location, clock, &query_ids);
            }
            CommandBody::Barrier => {
                issue_barrier(state, queue_index, command.flags);
            }
            CommandBody::SignalEvent { event_ordinal } => {
                issue_signal_event(state, queue_index, command.flags, *event_ordinal, ordinal, cmd_type)?;
            }
            CommandBody::ResetEvent { event_ordinal } => {
                issue_reset_event(state, signal_pool, queue_index, command.flags, *event_ordinal, ordinal, cmd_type)?;
            }
            CommandBody::WaitEvents { count, ordinals, overflow_ref } => {
                issue_wait_events(state, block, queue_index, *count, ordinals, *overflow_ref, ordinal, cmd_type)?;
            }
            CommandBody::FillBuffer { target_ref, length, pattern, kernarg_offset } => {
                issue_fill_buffer(state, queue_index, *target_ref, *length, *pattern, *kernarg_offset, ordinal, cmd_type)?;
            }
            CommandBody::CopyBuffer { source_ref, target_ref, length, kernarg_offset } => {
                issue_copy_buffer(state, queue_index, *source_ref, *target_ref, *length, *kernarg_offset, ordinal, cmd_type)?;
            }
            CommandBody::DispatchDirect { kernel_ref, grid_size, workgroup_size, kernarg_offset, .. } => {
                issue_dispatch_direct(state, signal_pool, queue_index, *kernel_ref, *grid_size, *workgroup_size, *kernarg_offset, &query_ids, clock, ordinal, cmd_type)?;
            }
            CommandBody::DispatchIndirectStatic { kernel_ref, grid_size_ref, workgroup_size, kernarg_offset, .. } => {
                issue_dispatch_indirect_static(state, block, queue_index, *kernel_ref, *grid_size_ref, *workgroup_size, *kernarg_offset, &query_ids, clock, ordinal, cmd_type)?;
            }
            CommandBody::DispatchIndirectDynamic { kernel_ref, workgroups_ref, workgroup_size, kernarg_offset, .. } => {
                issue_dispatch_indirect_dynamic(state, block, queue_index, *kernel_ref, *workgroups_ref, *workgroup_size, *kernarg_offset, &query_ids, clock, ordinal, cmd_type)?;
                continue;
            }
            CommandBody::Branch { target_block } => {
                return Ok(IssueOutcome::Branch { target_block: *target_block });
            }
            CommandBody::Return => {
                issue_return(state, queue_index);
                return Ok(IssueOutcome::Return);
            }
        }
    }

    let _ = block_ordinal;
    Ok(IssueOutcome::Continue)
}

fn issue_debug_group(
    state: &mut ExecutionState,
    queue_index: u64,
    flags: u8,
    source_location: u64,
    clock: &dyn SteadyClock,
    query_ids: &QueryIds,
) {
    let (acquire, release) = fence_scopes_from_flags(flags);
    let completion = state.query_signal(query_ids).unwrap_or(0);
    let packet = BarrierPacket::empty(false, acquire, release, completion as SignalHandle);
    state.execution_queue.emplace(queue_index, &packet);
    write_trace_event(&state.trace_buffer, TraceEventKind::ZoneBegin, clock.now(), &source_location.to_le_bytes());
}

fn issue_barrier(state: &mut ExecutionState, queue_index: u64, flags: u8) {
    let (acquire, release) = fence_scopes_from_flags(flags);
    let packet = BarrierPacket::empty(true, acquire, release, NULL_SIGNAL);
    state.execution_queue.emplace(queue_index, &packet);
}

/// The barrier packet's own `completion_signal` is the event: the packet
/// processor decrements it by one when the packet retires, the same
/// mechanism `issue_return` uses for the execution's completion signal.
fn issue_signal_event(
    state: &mut ExecutionState,
    queue_index: u64,
    flags: u8,
    event_ordinal: u32,
    ordinal: u32,
    cmd_type: u8,
) -> Result<(), CoreError> {
    let signal_id = *state.events.get(event_ordinal as usize).ok_or(CoreError::Malformed { cmd_type, ordinal })?;
    let (acquire, release) = fence_scopes_from_flags(flags);
    let packet = BarrierPacket::empty(false, acquire, release, signal_id as SignalHandle);
    state.execution_queue.emplace(queue_index, &packet);
    Ok(())
}

/// There is no packet-processor analogue for "set a value" (AQL only ever
/// decrements completion signals), so RESET_EVENT stores the not-signaled
/// value directly rather than going through a packet at all.
fn issue_reset_event(
    state: &mut ExecutionState,
    signal_pool: &SignalPool,
    queue_index: u64,
    flags: u8,
    event_ordinal: u32,
    ordinal: u32,
    cmd_type: u8,
) -> Result<(), CoreError> {
    let signal_id = *state.events.get(event_ordinal as usize).ok_or(CoreError::Malformed { cmd_type, ordinal })?;
    if let Some(signal) = signal_pool.get(signal_id) {
        signal.store(1, core::sync::atomic::Ordering::Release);
    }
    let (acquire, release) = fence_scopes_from_flags(flags);
    let packet = BarrierPacket::empty(false, acquire, release, NULL_SIGNAL);
    state.execution_queue.emplace(queue_index, &packet);
    Ok(())
}

/// `WAIT_EVENTS` of more than 5 events expands to `ceil(n/5)` consecutive
/// barrier packets; only the first carries the queue-barrier bit since the rest are already ordered after it by `packet_offset`.
/// Ordinals past the first `MAX_INLINE_WAIT_EVENTS` live in the block's
/// embedded data at `overflow_ref`, as consecutive little-endian `u32`s.
fn issue_wait_events(
    state: &mut ExecutionState,
    block: &CommandBlock,
    queue_index: u64,
    count: u8,
    ordinals: &[u32; MAX_INLINE_WAIT_EVENTS],
    overflow_ref: u32,
    ordinal: u32,
    cmd_type: u8,
) -> Result<(), CoreError> {
    let mut remaining = count as usize;
    let mut cursor = 0usize;
    let mut packet_index = queue_index;
    let mut first = true;
    while remaining > 0 || first {
        let take = remaining.min(MAX_INLINE_WAIT_EVENTS);
        let mut dep_signal = [NULL_SIGNAL; MAX_INLINE_WAIT_EVENTS];
        for slot in 0..take {
            let index = cursor + slot;
            let event_ordinal = if index < MAX_INLINE_WAIT_EVENTS {
                ordinals[index]
            } else {
                let offset = overflow_ref as usize + (index - MAX_INLINE_WAIT_EVENTS) * 4;
                let bytes = block.embedded_data.get(offset..offset + 4).ok_or(CoreError::Malformed { cmd_type, ordinal })?;
                u32::from_le_bytes(bytes.try_into().unwrap())
            };
            let signal_id = *state.events.get(event_ordinal as usize).ok_or(CoreError::Malformed { cmd_type, ordinal })?;
            dep_signal[slot] = signal_id as SignalHandle;
        }
        let packet = BarrierPacket {
            header: PacketHeader::new(PacketKind::BarrierAnd, first, FenceScope::Agent, FenceScope::Agent).to_bits(),
            reserved0: 0,
            reserved1: 0,
            dep_signal,
            reserved2: 0,
            completion_signal: NULL_SIGNAL,
        };
        state.execution_queue.emplace(packet_index, &packet);
        packet_index += 1;
        cursor += take;
        remaining -= take;
        first = false;
        if take == 0 {
            break;
        }
    }
    Ok(())
}

fn fill_pattern_kernel(len: u8) -> u64 {
    match len {
        1 => builtin::FILL_X1,
        2 => builtin::FILL_X2,
        4 => builtin::FILL_X4,
        _ => builtin::FILL_X8,
    }
}

fn copy_width_kernel(length: u64) -> u64 {
    if length % 8 == 0 {
        builtin::COPY_X8
    } else if length % 4 == 0 {
        builtin::COPY_X4
    } else if length % 2 == 0 {
        builtin::COPY_X2
    } else {
        builtin::COPY_X1
    }
}

fn issue_fill_buffer(
    state: &mut ExecutionState,
    queue_index: u64,
    target_ref: u32,
    length: u64,
    pattern: gpuq_abi::command::FillPattern,
    kernarg_offset: u32,
    ordinal: u32,
    cmd_type: u8,
) -> Result<(), CoreError> {
    let target = resolve_binding(state, target_ref, ordinal, cmd_type)?;
    let mut kernarg = Vec::with_capacity(8 + 8 + 8);
    kernarg.extend_from_slice(&target.to_le_bytes());
    kernarg.extend_from_slice(&length.to_le_bytes());
    kernarg.extend_from_slice(&pattern.bytes[..pattern.len as usize]);
    write_kernarg(&mut state.control_kernarg_storage, kernarg_offset, &kernarg, ordinal, cmd_type)?;

    let grid = (length / pattern.len.max(1) as u64).max(1) as u32;
    let packet = KernelDispatchPacket {
        header: PacketHeader::new(PacketKind::KernelDispatch, false, FenceScope::Agent, FenceScope::Agent).to_bits(),
        setup: 1,
        workgroup_size: [64, 1, 1],
        reserved0: 0,
        grid_size: [grid, 1, 1],
        private_segment_size: 0,
        group_segment_size: 0,
        kernel_object: fill_pattern_kernel(pattern.len),
        kernarg_address: kernarg_offset as u64,
        reserved2: 0,
        completion_signal: NULL_SIGNAL,
    };
    state.execution_queue.emplace(queue_index, &packet);
    Ok(())
}

fn issue_copy_buffer(
    state: &mut ExecutionState,
    queue_index: u64,
    source_ref: u32,
    target_ref: u32,
    length: u64,
    kernarg_offset: u32,
    ordinal: u32,
    cmd_type: u8,
) -> Result<(), CoreError> {
    let source = resolve_binding(state, source_ref, ordinal, cmd_type)?;
    let target = resolve_binding(state, target_ref, ordinal, cmd_type)?;
    let mut kernarg = Vec::with_capacity(24);
    kernarg.extend_from_slice(&source.to_le_bytes());
    kernarg.extend_from_slice(&target.to_le_bytes());
    kernarg.extend_from_slice(&length.to_le_bytes());
    write_kernarg(&mut state.control_kernarg_storage, kernarg_offset, &kernarg, ordinal, cmd_type)?;

    let width = copy_width_kernel(length);
    let grid = length.max(1) as u32;
    let packet = KernelDispatchPacket {
        header: PacketHeader::new(PacketKind::KernelDispatch, false, FenceScope::Agent, FenceScope::Agent).to_bits(),
        setup: 1,
        workgroup_size: [64, 1, 1],
        reserved0: 0,
        grid_size: [grid, 1, 1],
        private_segment_size: 0,
        group_segment_size: 0,
        kernel_object: width,
        kernarg_address: kernarg_offset as u64,
        reserved2: 0,
        completion_signal: NULL_SIGNAL,
    };
    state.execution_queue.emplace(queue_index, &packet);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn issue_dispatch_direct(
    state: &mut ExecutionState,
    signal_pool: &SignalPool,
    queue_index: u64,
    kernel_ref: u32,
    grid_size: [u32; 3],
    workgroup_size: [u16; 3],
    kernarg_offset: u32,
    query_ids: &QueryIds,
    clock: &dyn SteadyClock,
    ordinal: u32,
    cmd_type: u8,
) -> Result<(), CoreError> {
    let kernel_object = *state.kernels.get(kernel_ref as usize).ok_or(CoreError::Malformed { cmd_type, ordinal })?;
    let completion = state.query_signal(query_ids);
    if let Some(id) = completion {
        if let Some(signal) = signal_pool.get(id) {
            signal.set_start_ts(clock.now());
        }
    }
    let packet = KernelDispatchPacket {
        header: PacketHeader::new(PacketKind::KernelDispatch, false, FenceScope::Agent, FenceScope::Agent).to_bits(),
        setup: 1,
        workgroup_size,
        reserved0: 0,
        grid_size,
        private_segment_size: 0,
        group_segment_size: 0,
        kernel_object,
        kernarg_address: kernarg_offset as u64,
        reserved2: 0,
        completion_signal: completion.unwrap_or(0) as SignalHandle,
    };
    state.execution_queue.emplace(queue_index, &packet);
    write_trace_event(&state.trace_buffer, TraceEventKind::ExecutionZoneDispatch, clock.now(), &kernel_object.to_le_bytes());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn issue_dispatch_indirect_static(
    state: &mut ExecutionState,
    block: &CommandBlock,
    queue_index: u64,
    kernel_ref: u32,
    grid_size_ref: u32,
    workgroup_size: [u16; 3],
    kernarg_offset: u32,
    query_ids: &QueryIds,
    clock: &dyn SteadyClock,
    ordinal: u32,
    cmd_type: u8,
) -> Result<(), CoreError> {
    let kernel_object = *state.kernels.get(kernel_ref as usize).ok_or(CoreError::Malformed { cmd_type, ordinal })?;
    let offset = grid_size_ref as usize;
    let bytes = block.embedded_data.get(offset..offset + 12).ok_or(CoreError::Malformed { cmd_type, ordinal })?;
    let grid_size = [
        u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
    ];
    let completion = state.query_signal(query_ids).unwrap_or(0);
    let packet = KernelDispatchPacket {
        header: PacketHeader::new(PacketKind::KernelDispatch, false, FenceScope::Agent, FenceScope::Agent).to_bits(),
        setup: 1,
        workgroup_size,
        reserved0: 0,
        grid_size,
        private_segment_size: 0,
        group_segment_size: 0,
        kernel_object,
        kernarg_address: kernarg_offset as u64,
        reserved2: 0,
        completion_signal: completion as SignalHandle,
    };
    state.execution_queue.emplace(queue_index, &packet);
    let _ = clock;
    Ok(())
}

/// Emits the two-packet indirect-dynamic dispatch pattern:
/// packet `k` dispatches the builtin fixup kernel; packet `k+1` is staged
/// INVALID with everything but `grid_size` already written. There is no
/// separate device execution phase in this port, so the fixup runs
/// synchronously right here instead of as a later builtin invocation —
/// the observable packet sequence and final state match what a real
/// asynchronous fixup would leave behind.
#[allow(clippy::too_many_arguments)]
fn issue_dispatch_indirect_dynamic(
    state: &mut ExecutionState,
    block: &CommandBlock,
    queue_index: u64,
    kernel_ref: u32,
    workgroups_ref: u32,
    workgroup_size: [u16; 3],
    kernarg_offset: u32,
    query_ids: &QueryIds,
    clock: &dyn SteadyClock,
    ordinal: u32,
    cmd_type: u8,
) -> Result<(), CoreError> {
    let kernel_object = *state.kernels.get(kernel_ref as usize).ok_or(CoreError::Malformed { cmd_type, ordinal })?;
    let fixup_packet = KernelDispatchPacket {
        header: PacketHeader::new(PacketKind::KernelDispatch, false, FenceScope::Agent, FenceScope::Agent).to_bits(),
        setup: 1,
        workgroup_size: [1, 1, 1],
        reserved0: 0,
        grid_size: [1, 1, 1],
        private_segment_size: 0,
        group_segment_size: 0,
        kernel_object: builtin::WORKGROUP_COUNT_UPDATE,
        kernarg_address: kernarg_offset as u64,
        reserved2: 0,
        completion_signal: NULL_SIGNAL,
    };
    state.execution_queue.emplace(queue_index, &fixup_packet);

    let completion = state.query_signal(query_ids).unwrap_or(0);
    let staged = KernelDispatchPacket {
        header: PacketHeader::INVALID,
        setup: 1,
        workgroup_size,
        reserved0: 0,
        grid_size: [0, 0, 0],
        private_segment_size: 0,
        group_segment_size: 0,
        kernel_object,
        kernarg_address: (kernarg_offset as u64) + 32,
        reserved2: 0,
        completion_signal: completion as SignalHandle,
    };
    let second_index = queue_index + 1;
    state.execution_queue.stage_invalid(second_index, &staged);

    let offset = workgroups_ref as usize;
    let bytes = block.embedded_data.get(offset..offset + 12).ok_or(CoreError::Malformed { cmd_type, ordinal })?;
    let grid_size = [
        u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
        u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
        u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
    ];
    let real_header = PacketHeader::new(PacketKind::KernelDispatch, false, FenceScope::Agent, FenceScope::Agent).to_bits();
    state.execution_queue.patch_body_and_publish(second_index, real_header, |raw| {
        raw[12..16].copy_from_slice(&grid_size[0].to_le_bytes());
        raw[16..20].copy_from_slice(&grid_size[1].to_le_bytes());
        raw[20..24].copy_from_slice(&grid_size[2].to_le_bytes());
    });

    write_trace_event(&state.trace_buffer, TraceEventKind::ExecutionZoneDispatch, clock.now(), &kernel_object.to_le_bytes());
    Ok(())
}

fn issue_return(state: &mut ExecutionState, queue_index: u64) {
    let packet = BarrierPacket::empty(true, FenceScope::System, FenceScope::System, state.completion_signal as SignalHandle);
    state.execution_queue.emplace(queue_index, &packet);
}
