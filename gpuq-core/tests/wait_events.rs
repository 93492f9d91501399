//! WAIT_EVENTS of more than 5 events expands to two consecutive barrier
//! packets, with ordinals past the inline slots resolved from the block's
//! embedded data.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use gpuq_abi::{CommandBody, PacketKind};
use gpuq_core::atomics::ManualClock;
use gpuq_core::{BlockBuilder, CommandBufferBuilder, Limits, QueryIds, QueryMap, QueueEntry, QueueEntryKind, Scheduler, SignalKind, TraceMode};

#[test]
fn wait_events_overflow_reads_ordinals_from_embedded_data_without_panicking() {
    let mut scheduler = Scheduler::new(Limits::default());
    let clock = ManualClock::new();
    let completion_signal = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();

    let mut block = BlockBuilder::new(3);
    let overflow_ordinals: [u32; 2] = [5, 6];
    let mut embedded = Vec::new();
    for v in overflow_ordinals {
        embedded.extend_from_slice(&v.to_le_bytes());
    }
    let overflow_ref = block.embed(&embedded);

    block
        .command(
            0,
            CommandBody::WaitEvents {
                count: 7,
                ordinals: [0, 1, 2, 3, 4],
                overflow_ref,
            },
            QueryIds::default(),
        )
        .unwrap();
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
            kernels: Vec::new(),
            bindings: Vec::new(),
            event_count: 7,
            trace_mode: TraceMode::None,
            completion_signal,
        },
    ));

    scheduler.tick(&clock);
    assert!(!scheduler.is_lost(), "reading the 6th and 7th ordinals from embedded_data must not report Malformed");

    let queue = scheduler.execution_queue();
    assert_eq!(queue.read_header(0, Ordering::Acquire).kind, PacketKind::BarrierAnd);
    assert_eq!(queue.read_header(1, Ordering::Acquire).kind, PacketKind::BarrierAnd);
    assert!(queue.read_header(0, Ordering::Acquire).barrier_bit);
    assert!(!queue.read_header(1, Ordering::Acquire).barrier_bit);

    assert_eq!(scheduler.signal_pool().get(completion_signal).unwrap().load(Ordering::Acquire), 0);
}
