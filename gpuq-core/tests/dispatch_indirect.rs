//! S2 — DISPATCH_INDIRECT_DYNAMIC emits the two-packet fixup-then-patch
//! pattern and leaves the correct grid size behind.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use gpuq_abi::{CommandBody, PacketKind};
use gpuq_core::atomics::ManualClock;
use gpuq_core::{BlockBuilder, CommandBufferBuilder, Limits, QueryIds, QueryMap, QueueEntry, QueueEntryKind, Scheduler, SignalKind, TraceMode};

const REAL_KERNEL: u64 = 0x1234_5678;

#[test]
fn indirect_dynamic_dispatch_patches_grid_size_from_the_embedded_buffer() {
    let mut scheduler = Scheduler::new(Limits::default());
    let clock = ManualClock::new();
    let completion_signal = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();

    let mut block = BlockBuilder::new(2);
    let workgroups = [7u32, 9u32, 1u32];
    let mut embedded = Vec::new();
    for v in workgroups {
        embedded.extend_from_slice(&v.to_le_bytes());
    }
    let workgroups_ref = block.embed(&embedded);

    block
        .command(
            0,
            CommandBody::DispatchIndirectDynamic {
                kernel_ref: 0,
                workgroups_ref,
                workgroup_size: [8, 8, 1],
                kernarg_offset: 0,
                binding_table_offset: 0,
                binding_count: 0,
            },
            QueryIds::default(),
        )
        .unwrap();
    let built = block.finish(QueryMap::default());

    let mut builder = CommandBufferBuilder::new(0);
    builder.push_block(built).unwrap();
    let command_buffer = Arc::new(builder.finish());

    scheduler.submit(QueueEntry::new(
        0,
        Vec::new(),
        QueueEntryKind::Execute {
            command_buffer,
            kernels: vec![REAL_KERNEL],
            bindings: Vec::new(),
            event_count: 0,
            trace_mode: TraceMode::None,
            completion_signal,
        },
    ));

    scheduler.tick(&clock);

    let queue = scheduler.execution_queue();
    assert_eq!(queue.read_header(0, Ordering::Acquire).kind, PacketKind::KernelDispatch);
    assert_eq!(queue.read_header(1, Ordering::Acquire).kind, PacketKind::KernelDispatch);

    let fixup = queue.read_raw(0);
    let fixup_kernel = u64::from_le_bytes(fixup[32..40].try_into().unwrap());
    assert_ne!(fixup_kernel, REAL_KERNEL, "packet k must dispatch the builtin fixup, not the user kernel");

    let dispatch = queue.read_raw(1);
    let dispatch_kernel = u64::from_le_bytes(dispatch[32..40].try_into().unwrap());
    assert_eq!(dispatch_kernel, REAL_KERNEL);

    let grid_x = u32::from_le_bytes(dispatch[12..16].try_into().unwrap());
    let grid_y = u32::from_le_bytes(dispatch[16..20].try_into().unwrap());
    let grid_z = u32::from_le_bytes(dispatch[20..24].try_into().unwrap());
    assert_eq!([grid_x, grid_y, grid_z], workgroups);

    assert_eq!(scheduler.signal_pool().get(completion_signal).unwrap().load(Ordering::Acquire), 0);
}
