//! Integration coverage for the tick scheduler driven through its public
//! `Scheduler` API, as opposed to the inline unit tests in `scheduler.rs`
//! which poke at single-entry behavior directly.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use gpuq_abi::{CommandBody, ErrorCode, ExhaustedResource, HostCallKind, PacketKind};
use gpuq_core::atomics::ManualClock;
use gpuq_core::{
    BlockBuilder, CommandBufferBuilder, Limits, QueryIds, QueryMap, QueueEntry, QueueEntryKind,
    Scheduler, SignalKind, TraceMode, WaitTuple,
};

fn direct_dispatch(kernel_ref: u32) -> CommandBody {
    CommandBody::DispatchDirect {
        kernel_ref,
        grid_size: [64, 1, 1],
        workgroup_size: [32, 1, 1],
        kernarg_offset: 0,
        binding_table_offset: 0,
        binding_count: 0,
    }
}

/// S1: `[DISPATCH, BARRIER, DISPATCH, RETURN]` on an otherwise idle
/// scheduler emits `[K, BARRIER_AND, K, BARRIER_AND(completion=exec_sig)]`.
#[test]
fn straight_line_execution_emits_the_expected_packet_sequence() {
    let mut scheduler = Scheduler::new(Limits::default());
    let clock = ManualClock::new();
    let completion_signal = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();

    let mut block = BlockBuilder::new(4);
    block.command(0, direct_dispatch(0), QueryIds::default()).unwrap();
    block.command(0, CommandBody::Barrier, QueryIds::default()).unwrap();
    block.command(0, direct_dispatch(0), QueryIds::default()).unwrap();
    block.command(0, CommandBody::Return, QueryIds::default()).unwrap();
    let built = block.finish(QueryMap::default());

    let mut builder = CommandBufferBuilder::new(0);
    builder.push_block(built).unwrap();
    let command_buffer = Arc::new(builder.finish());

    scheduler.submit(QueueEntry::new(
        0,
        Vec::new(),
        QueueEntryKind::Execute {
            command_buffer,
            kernels: vec![0xdead_beef],
            bindings: Vec::new(),
            event_count: 0,
            trace_mode: TraceMode::None,
            completion_signal,
        },
    ));

    scheduler.tick(&clock);

    let queue = scheduler.execution_queue();
    let kinds: Vec<PacketKind> = (0..4).map(|i| queue.read_header(i, Ordering::Acquire).kind).collect();
    assert_eq!(
        kinds,
        [PacketKind::KernelDispatch, PacketKind::BarrierAnd, PacketKind::KernelDispatch, PacketKind::BarrierAnd]
    );
    assert!(queue.read_header(1, Ordering::Acquire).barrier_bit);
    assert!(queue.read_header(3, Ordering::Acquire).barrier_bit);

    let retire = queue.read_raw(3);
    let completion_bits = u64::from_le_bytes(retire[56..64].try_into().unwrap());
    assert_eq!(completion_bits, completion_signal as u64);

    assert_eq!(scheduler.signal_pool().get(completion_signal).unwrap().load(Ordering::Acquire), 0);
}

/// S3: `E1` has no waits, `E2` waits on `S` falling to `<=7`; `S` is
/// advanced to 7 before the tick runs, so both entries drain on the same
/// tick and the wait list ends up empty.
#[test]
fn wait_resolved_before_recheck_issues_in_the_same_tick() {
    let mut scheduler = Scheduler::new(Limits::default());
    let clock = ManualClock::new();

    let gate = scheduler.signal_pool().acquire(SignalKind::User, 10).unwrap();
    let e1_completion = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();
    let e2_completion = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();

    scheduler.submit(QueueEntry::new(0, Vec::new(), QueueEntryKind::Barrier { completion_signal: e1_completion }));
    scheduler.submit(QueueEntry::new(
        0,
        vec![WaitTuple { signal_id: gate, required_payload: 7 }],
        QueueEntryKind::Barrier { completion_signal: e2_completion },
    ));

    scheduler.signal_pool().get(gate).unwrap().store(7, Ordering::Release);

    scheduler.tick(&clock);

    assert_eq!(scheduler.signal_pool().get(e1_completion).unwrap().load(Ordering::Acquire), 0);
    assert_eq!(scheduler.signal_pool().get(e2_completion).unwrap().load(Ordering::Acquire), 0);
}

/// S6: once the wake pool is full, one more waiting entry exhausts it; the
/// scheduler posts `POST_ERROR(EXHAUSTED, WAKE_POOL, capacity)` and every
/// later tick is a no-op.
#[test]
fn wake_pool_exhaustion_posts_error_and_latches_lost() {
    let limits = Limits {
        signal_pool_capacity: 16,
        wake_pool_capacity: 2,
        execution_queue_size: 4,
        host_post_queue_size: 4,
        trace_ring_capacity: 64,
        trace_query_capacity: 4,
    };
    let mut scheduler = Scheduler::new(limits);
    let clock = ManualClock::new();

    for _ in 0..2 {
        let gate = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();
        let completion = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();
        scheduler.submit(QueueEntry::new(
            0,
            vec![WaitTuple { signal_id: gate, required_payload: 0 }],
            QueueEntryKind::Barrier { completion_signal: completion },
        ));
    }
    let overflow_gate = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();
    let overflow_completion = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();
    scheduler.submit(QueueEntry::new(
        0,
        vec![WaitTuple { signal_id: overflow_gate, required_payload: 0 }],
        QueueEntryKind::Barrier { completion_signal: overflow_completion },
    ));

    assert!(!scheduler.tick(&clock));
    assert!(scheduler.is_lost());

    let posted = scheduler.host_post().peek(0);
    let call_type = u16::from_le_bytes([posted[2], posted[3]]);
    assert_eq!(call_type, HostCallKind::PostError as u16);
    let code = u64::from_le_bytes(posted[8..16].try_into().unwrap());
    assert_eq!(code, ErrorCode::Exhausted as u64);
    let resource = u64::from_le_bytes(posted[16..24].try_into().unwrap());
    assert_eq!(resource, ExhaustedResource::WakePool as u64);
    let capacity = u64::from_le_bytes(posted[24..32].try_into().unwrap());
    assert_eq!(capacity, 2);

    let write_index_before = scheduler.host_post().load_write_index(Ordering::Relaxed);
    assert!(!scheduler.tick(&clock));
    assert_eq!(scheduler.host_post().load_write_index(Ordering::Relaxed), write_index_before);
}
