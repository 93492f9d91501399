//! Drives a `gpuq_core::Scheduler` through a couple of queue entries on the
//! host, ticking it by hand the way a test harness or a host-side polling
//! thread would. Adapted from `panda-kernel/src/logging.rs`'s `Logger`, but
//! writing to stdout instead of a serial port since this runs on the host.

use std::sync::atomic::Ordering;

use gpuq_abi::PacketHeader;
use gpuq_core::{Limits, QueueEntry, QueueEntryKind, Scheduler};
use gpuq_core::signal::SignalKind;
use gpuq_core::atomics::ManualClock;

struct Logger;

impl log::Log for Logger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        println!(
            "[{}:{}] {}: {}",
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.level(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;

fn main() {
    log::set_logger(&LOGGER).expect("logger already set");
    log::set_max_level(log::LevelFilter::Debug);

    let mut scheduler = Scheduler::new(Limits::default());
    let clock = ManualClock::new();

    let alloc_done = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();
    let barrier_done = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();

    scheduler.submit(QueueEntry::new(
        0,
        Vec::new(),
        QueueEntryKind::Alloca { bytes: 4096, completion_signal: alloc_done },
    ));
    scheduler.submit(QueueEntry::new(
        0,
        Vec::new(),
        QueueEntryKind::Barrier { completion_signal: barrier_done },
    ));

    while scheduler.handle().take_pending() {
        scheduler.tick(&clock);
        clock.advance(1);
    }

    let pool_grow = scheduler.host_post().peek(0);
    let header = PacketHeader::from_bits(u16::from_le_bytes([pool_grow[0], pool_grow[1]]));
    println!("posted host call at index 0: {header:?}");

    let remaining = scheduler
        .signal_pool()
        .get(barrier_done)
        .map(|signal| signal.load(Ordering::Acquire))
        .unwrap_or(-1);
    println!("barrier completion signal after tick: {remaining}");
}
