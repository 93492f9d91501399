//! Queue scheduler: the device-resident, single-work-item tick kernel that
//! turns submitted queue entries into AQL packets.
//!
//! `Scheduler` owns one hardware queue's worth of resources (signal pool,
//! wake pool, execution queue, trace ring, host post channel) the way
//! `config::Limits`'s doc comment describes: one instance per queue, built
//! from one `Limits`. The mailbox is the only piece touched from outside a
//! tick, so it is the only field behind a lock.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use log::{debug, warn};
use spinning_top::Spinlock;

use gpuq_abi::command::FillPattern;
use gpuq_abi::{BarrierPacket, FenceScope, SignalHandle, NULL_SIGNAL};

use crate::aql_queue::AqlQueue;
use crate::atomics::SteadyClock;
use crate::command_buffer::CommandBuffer;
use crate::config::Limits;
use crate::error::CoreError;
use crate::host_post::HostPostChannel;
use crate::issue::{issue_block, ExecutionState, IssueOutcome, TraceMode};
use crate::signal::{SignalId, NULL_SIGNAL_ID};
use crate::signal_pool::SignalPool;
use crate::trace::{QueryRing, TraceRingBuffer};
use crate::wake::{WakePool, WakeSet};

/// Shared pending-schedule bit and identity anchor. Held by
/// an `Arc` so `SchedulerHandle`s can be cloned freely and parked on a
/// `Signal`'s wake list without the signal needing to outlive the scheduler
/// (mirrors `panda-kernel`'s `MailboxRef`/`Mailbox` split, but here the
/// handle is the cheap side and nothing needs a `Weak`: nothing owned by a
/// `Scheduler` ever points back at the `Signal`s that hold its handle).
struct SchedulerCore {
    pending: AtomicBool,
}

#[derive(Clone)]
pub struct SchedulerHandle {
    core: Arc<SchedulerCore>,
}

impl SchedulerHandle {
    pub fn wake(&self) {
        self.core.pending.store(true, Ordering::Release);
    }

    pub fn is_same(&self, other: &SchedulerHandle) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Clears and returns the pending flag.
    pub fn take_pending(&self) -> bool {
        self.core.pending.swap(false, Ordering::AcqRel)
    }
}

/// One wait tuple `{semaphore, required_payload}`.
#[derive(Debug, Clone, Copy)]
pub struct WaitTuple {
    pub signal_id: SignalId,
    pub required_payload: i64,
}

/// Submission-level work, a queue entry: common `{flags, epoch, waits}`
/// plus variant args. `list_next` is not modeled as a field — membership
/// in exactly one of the mailbox/wait/run list is already enforced by
/// which `Vec`/`VecDeque` actually holds the entry, so an intrusive
/// arena-index-with-sentinel scheme has nothing to add here.
pub struct QueueEntry {
    pub flags: u8,
    pub epoch: u64,
    pub waits: Vec<WaitTuple>,
    pub kind: QueueEntryKind,
}

impl QueueEntry {
    pub fn new(flags: u8, waits: Vec<WaitTuple>, kind: QueueEntryKind) -> Self {
        Self { flags, epoch: 0, waits, kind }
    }
}

pub enum QueueEntryKind {
    Initialize { resource: u64, completion_signal: SignalId },
    Deinitialize { resource: u64, completion_signal: SignalId },
    Alloca { bytes: u64, completion_signal: SignalId },
    Dealloca { resource: u64, completion_signal: SignalId },
    Fill { target: u64, length: u64, pattern: FillPattern, completion_signal: SignalId },
    Copy { source: u64, target: u64, length: u64, completion_signal: SignalId },
    Barrier { completion_signal: SignalId },
    Execute {
        command_buffer: Arc<CommandBuffer>,
        kernels: Vec<u64>,
        bindings: Vec<u64>,
        event_count: usize,
        trace_mode: TraceMode,
        completion_signal: SignalId,
    },
}

/// Per-hardware-queue scheduler.
pub struct Scheduler {
    core: Arc<SchedulerCore>,
    incoming: Spinlock<VecDeque<QueueEntry>>,
    wait_list: Vec<QueueEntry>,
    run_list: Vec<QueueEntry>,
    next_epoch: u64,
    signal_pool: SignalPool,
    wake_pool: WakePool,
    query_ring: QueryRing,
    trace_buffer: Arc<TraceRingBuffer>,
    execution_queue: Arc<AqlQueue>,
    host_post: HostPostChannel,
    /// Latched once a `POST_ERROR` has been sent; ticks become no-ops after
    /// that.
    lost: AtomicBool,
}

impl Scheduler {
    pub fn new(limits: Limits) -> Self {
        limits.validate().expect("invalid scheduler limits");
        Self {
            core: Arc::new(SchedulerCore { pending: AtomicBool::new(false) }),
            incoming: Spinlock::new(VecDeque::new()),
            wait_list: Vec::new(),
            run_list: Vec::new(),
            next_epoch: 0,
            signal_pool: SignalPool::new(limits.signal_pool_capacity),
            wake_pool: WakePool::new(limits.wake_pool_capacity),
            query_ring: QueryRing::new(limits.trace_query_capacity),
            trace_buffer: Arc::new(TraceRingBuffer::new(limits.trace_ring_capacity, 0)),
            execution_queue: Arc::new(AqlQueue::new(limits.execution_queue_size as u64, 0)),
            host_post: HostPostChannel::new(limits.host_post_queue_size as u64, 0),
            lost: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle { core: self.core.clone() }
    }

    pub fn signal_pool(&self) -> &SignalPool {
        &self.signal_pool
    }

    pub fn host_post(&self) -> &HostPostChannel {
        &self.host_post
    }

    pub fn trace_buffer(&self) -> &TraceRingBuffer {
        &self.trace_buffer
    }

    pub fn execution_queue(&self) -> &AqlQueue {
        &self.execution_queue
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    /// Appends a submission to the soft-queue mailbox; safe to call from
    /// outside a tick.
    pub fn submit(&self, entry: QueueEntry) {
        self.incoming.lock().push_back(entry);
        self.core.pending.store(true, Ordering::Release);
    }

    /// Runs one scheduler tick. Returns `true` if the scheduler
    /// woke itself and should be ticked again.
    pub fn tick(&mut self, clock: &dyn SteadyClock) -> bool {
        if self.lost.load(Ordering::Acquire) {
            return false;
        }

        self.core.pending.store(false, Ordering::Release);

        self.drain_incoming();

        if let Err(err) = self.recheck_waits() {
            self.enter_lost(&err);
            return false;
        }

        let mut wake_set = WakeSet::new();
        if let Err(err) = self.drain_run_list(clock, &mut wake_set) {
            self.enter_lost(&err);
            return false;
        }

        let self_woken = wake_set.flush(&self.handle());

        if self.trace_buffer.commit_range() {
            self.host_post.post_trace_flush(0, NULL_SIGNAL);
        }

        if self_woken {
            debug!("scheduler re-enqueued itself");
            self.core.pending.store(true, Ordering::Release);
        }
        self_woken
    }

    fn enter_lost(&mut self, err: &CoreError) {
        warn!("scheduler lost: {err}");
        self.lost.store(true, Ordering::Release);
        self.host_post.post_error(err);
    }

    fn drain_incoming(&mut self) {
        let mut incoming = self.incoming.lock();
        while let Some(mut entry) = incoming.pop_front() {
            entry.epoch = self.next_epoch;
            self.next_epoch += 1;
            if entry.waits.is_empty() {
                self.run_list.push(entry);
            } else {
                self.wait_list.push(entry);
            }
        }
    }

    /// Iterates each wait-listed entry's remaining wait tuples, stopping at
    /// the first unsatisfied one; entries whose waits all resolve move to
    /// the run list.
    fn recheck_waits(&mut self) -> Result<(), CoreError> {
        let pending = core::mem::take(&mut self.wait_list);
        let mut still_waiting = Vec::with_capacity(pending.len());
        for mut entry in pending {
            let mut blocked = false;
            let mut i = 0;
            while i < entry.waits.len() {
                let wait = entry.waits[i];
                let wake_index = self.wake_pool.reserve(wait.signal_id, wait.required_payload)?;
                let handle = self.handle();
                let enrolled = match self.signal_pool.get(wait.signal_id) {
                    None => false,
                    Some(signal) => signal.update_wait(&handle, wait.required_payload),
                };
                if enrolled {
                    blocked = true;
                    break;
                }
                self.wake_pool.release(wake_index);
                entry.waits.swap_remove(i);
            }
            if blocked {
                still_waiting.push(entry);
            } else {
                self.run_list.push(entry);
            }
        }
        self.wait_list = still_waiting;
        Ok(())
    }

    fn drain_run_list(&mut self, clock: &dyn SteadyClock, wake_set: &mut WakeSet) -> Result<(), CoreError> {
        self.run_list.sort_by_key(|entry| entry.epoch);
        let ready = core::mem::take(&mut self.run_list);
        for entry in ready {
            self.issue_entry(entry, clock, wake_set)?;
        }
        Ok(())
    }

    fn issue_entry(&mut self, entry: QueueEntry, clock: &dyn SteadyClock, wake_set: &mut WakeSet) -> Result<(), CoreError> {
        match entry.kind {
            QueueEntryKind::Initialize { resource, completion_signal }
            | QueueEntryKind::Deinitialize { resource, completion_signal } => {
                self.host_post.post_release([resource, 0, 0, 0], completion_signal as SignalHandle);
                self.advance_signal(completion_signal, -1, wake_set);
            }
            QueueEntryKind::Alloca { bytes, completion_signal } => {
                self.host_post.post_pool_grow(bytes, completion_signal as SignalHandle);
            }
            QueueEntryKind::Dealloca { resource, completion_signal } => {
                self.host_post.post_release([resource, 0, 0, 0], completion_signal as SignalHandle);
                self.advance_signal(completion_signal, -1, wake_set);
            }
            QueueEntryKind::Fill { target, length, pattern, completion_signal } => {
                self.issue_inline_fill(entry.flags, target, length, pattern, completion_signal);
                self.advance_signal(completion_signal, -1, wake_set);
            }
            QueueEntryKind::Copy { source, target, length, completion_signal } => {
                self.issue_inline_copy(entry.flags, source, target, length, completion_signal);
                self.advance_signal(completion_signal, -1, wake_set);
            }
            QueueEntryKind::Barrier { completion_signal } => {
                self.issue_inline_barrier(entry.flags, completion_signal);
                self.advance_signal(completion_signal, -1, wake_set);
            }
            QueueEntryKind::Execute { command_buffer, kernels, bindings, event_count, trace_mode, completion_signal } => {
                self.issue_execute(command_buffer, kernels, bindings, event_count, trace_mode, completion_signal, clock, wake_set)?;
            }
        }
        Ok(())
    }

    /// Advances a signal. `Signal::add` already walks the wake list and
    /// wakes every parked scheduler directly, so this only needs to record
    /// into the tick's wake set when the advance woke this scheduler's own
    /// parked wait, since that's the one case `tick` needs to know about to
    /// decide whether to re-enqueue itself before returning.
    fn advance_signal(&self, signal_id: SignalId, delta: i64, wake_set: &mut WakeSet) {
        if signal_id == NULL_SIGNAL_ID {
            return;
        }
        if let Some(signal) = self.signal_pool.get(signal_id) {
            let (_, woke_self) = signal.add_checking_waiter(delta, Ordering::AcqRel, &self.handle());
            if woke_self {
                wake_set.record(self.handle());
            }
        }
    }

    fn issue_inline_barrier(&self, flags: u8, completion_signal: SignalId) {
        let (acquire, release) = fence_scopes(flags);
        let index = self.execution_queue.reserve(1);
        let packet = BarrierPacket::empty(true, acquire, release, completion_signal as SignalHandle);
        self.execution_queue.emplace(index, &packet);
    }

    fn issue_inline_fill(&self, flags: u8, target: u64, length: u64, pattern: FillPattern, completion_signal: SignalId) {
        let _ = (target, length, pattern);
        self.issue_inline_barrier(flags, completion_signal);
    }

    fn issue_inline_copy(&self, flags: u8, source: u64, target: u64, length: u64, completion_signal: SignalId) {
        let _ = (source, target, length);
        self.issue_inline_barrier(flags, completion_signal);
    }

    /// Runs an EXECUTE entry's command buffer to completion.
    /// A real device hands each block's `issue_block` to the scheduler
    /// queue as a separate tail-called kernel; there is no asynchronous
    /// scheduler queue in this port, so blocks are issued back-to-back in
    /// this function instead, following BRANCH targets until RETURN. The
    /// observable AQL packet sequence is identical either way.
    #[allow(clippy::too_many_arguments)]
    fn issue_execute(
        &mut self,
        command_buffer: Arc<CommandBuffer>,
        kernels: Vec<u64>,
        bindings: Vec<u64>,
        event_count: usize,
        trace_mode: TraceMode,
        completion_signal: SignalId,
        clock: &dyn SteadyClock,
        wake_set: &mut WakeSet,
    ) -> Result<(), CoreError> {
        let mut state = ExecutionState::new(
            command_buffer.clone(),
            self.execution_queue.clone(),
            self.trace_buffer.clone(),
            trace_mode,
            event_count,
            completion_signal,
        );
        state.kernels = kernels;
        state.bindings = bindings;

        let mut block_ordinal = 0u32;
        loop {
            let block = command_buffer
                .blocks
                .get(block_ordinal as usize)
                .ok_or(CoreError::Malformed { cmd_type: 0, ordinal: block_ordinal })?;
            let base_queue_index = self.execution_queue.reserve(block.max_packet_count as u64);
            let outcome = issue_block(&mut state, &self.signal_pool, &self.query_ring, clock, block, block_ordinal, base_queue_index)?;
            match outcome {
                IssueOutcome::Continue => {
                    block_ordinal += 1;
                    if block_ordinal as usize >= command_buffer.blocks.len() {
                        break;
                    }
                }
                IssueOutcome::Branch { target_block } => {
                    block_ordinal = target_block;
                }
                IssueOutcome::Return => break,
            }
        }

        self.advance_signal(completion_signal, -1, wake_set);
        Ok(())
    }
}

fn fence_scopes(flags: u8) -> (FenceScope, FenceScope) {
    (FenceScope::from_u8(flags & 0x3), FenceScope::from_u8((flags >> 2) & 0x3))
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::atomics::ManualClock;
    use crate::signal::SignalKind;

    #[test]
    fn handle_pending_round_trips() {
        let scheduler = Scheduler::new(Limits::default());
        assert!(!scheduler.handle().take_pending());
        scheduler.handle().wake();
        assert!(scheduler.handle().take_pending());
        assert!(!scheduler.handle().take_pending());
    }

    #[test]
    fn two_handles_from_the_same_scheduler_are_the_same() {
        let scheduler = Scheduler::new(Limits::default());
        assert!(scheduler.handle().is_same(&scheduler.handle()));
        let other = Scheduler::new(Limits::default());
        assert!(!scheduler.handle().is_same(&other.handle()));
    }

    #[test]
    fn unblocked_entry_runs_on_the_first_tick() {
        let mut scheduler = Scheduler::new(Limits::default());
        let clock = ManualClock::new();
        let completion_signal = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();
        scheduler.submit(QueueEntry::new(0, Vec::new(), QueueEntryKind::Barrier { completion_signal }));
        scheduler.tick(&clock);
        assert_eq!(scheduler.signal_pool().get(completion_signal).unwrap().load(Ordering::Acquire), 0);
    }

    #[test]
    fn entry_with_unresolved_wait_stays_parked() {
        let mut scheduler = Scheduler::new(Limits::default());
        let clock = ManualClock::new();
        let gate = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();
        let completion_signal = scheduler.signal_pool().acquire(SignalKind::User, 1).unwrap();
        scheduler.submit(QueueEntry::new(
            0,
            alloc::vec![WaitTuple { signal_id: gate, required_payload: 0 }],
            QueueEntryKind::Barrier { completion_signal },
        ));
        scheduler.tick(&clock);
        assert_eq!(scheduler.signal_pool().get(completion_signal).unwrap().load(Ordering::Acquire), 1);

        scheduler.signal_pool().get(gate).unwrap().store(0, Ordering::Release);
        assert!(scheduler.handle().take_pending());
        scheduler.tick(&clock);
        assert_eq!(scheduler.signal_pool().get(completion_signal).unwrap().load(Ordering::Acquire), 0);
    }

    #[test]
    fn lost_scheduler_stops_ticking() {
        let mut scheduler = Scheduler::new(Limits::default());
        let clock = ManualClock::new();
        scheduler.lost.store(true, Ordering::Release);
        scheduler.submit(QueueEntry::new(0, Vec::new(), QueueEntryKind::Barrier { completion_signal: NULL_SIGNAL_ID }));
        assert!(!scheduler.tick(&clock));
        assert!(scheduler.incoming.lock().len() == 1);
    }
}
