//! HSA-style decrement-to-zero semaphore primitive.
//!
//! The wake-list side of a `Signal` mirrors `resource/mailbox.rs`'s shape:
//! a small `Spinlock`-guarded `Vec` of waiters, each holding a handle to
//! the scheduler it wakes. Nothing owned by a `Scheduler` points back at
//! the signals parking its handle, so a plain `Arc`-backed clone is enough
//! here; there is no cycle for a `Weak` to break.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use spinning_top::Spinlock;

use crate::atomics::spin_yield;
use crate::scheduler::SchedulerHandle;

pub type SignalId = u32;

/// Zero is the null signal: waits succeed immediately, stores are no-ops.
pub const NULL_SIGNAL_ID: SignalId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    User,
    Doorbell,
}

/// Condition a consumer waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    Eq(i64),
    Ne(i64),
    Lt(i64),
    Gte(i64),
}

impl WaitCondition {
    pub fn is_satisfied(self, value: i64) -> bool {
        match self {
            WaitCondition::Eq(target) => value == target,
            WaitCondition::Ne(target) => value != target,
            WaitCondition::Lt(target) => value < target,
            WaitCondition::Gte(target) => value >= target,
        }
    }
}

struct WakeListEntry {
    scheduler: SchedulerHandle,
    /// The signal must fall to at most this value to satisfy the wait
    /// (decrement-to-zero counting: waits are thresholds the value falls
    /// through, not targets it rises to).
    threshold: i64,
}

/// A 64-bit semaphore with a wake list for parked schedulers.
pub struct Signal {
    pub kind: SignalKind,
    value: AtomicI64,
    pub event_mailbox: u32,
    pub event_id: u32,
    start_ts: AtomicU64,
    end_ts: AtomicU64,
    pub owning_queue: u32,
    wake_list: Spinlock<Vec<WakeListEntry>>,
}

impl Signal {
    pub fn new(kind: SignalKind, initial_value: i64) -> Self {
        Self {
            kind,
            value: AtomicI64::new(initial_value),
            event_mailbox: 0,
            event_id: 0,
            start_ts: AtomicU64::new(0),
            end_ts: AtomicU64::new(0),
            owning_queue: 0,
            wake_list: Spinlock::new(Vec::new()),
        }
    }

    pub fn load(&self, order: Ordering) -> i64 {
        self.value.load(order)
    }

    pub fn store(&self, value: i64, order: Ordering) {
        self.value.store(value, order);
        self.notify_waiters(value, None);
    }

    /// Atomic add (positive `delta`) or subtract (negative), returning the
    /// new value. The standard completion pattern decrements by 1 per
    /// producer.
    pub fn add(&self, delta: i64, order: Ordering) -> i64 {
        let new_value = self.value.fetch_add(delta, order) + delta;
        self.notify_waiters(new_value, None);
        new_value
    }

    /// Like `add`, but also reports whether `self_handle` itself had a wait
    /// parked on this signal that the advance just satisfied. Every parked
    /// scheduler, `self_handle` included, is still woken directly here; the
    /// caller only needs the bool to decide its own re-enqueue.
    pub fn add_checking_waiter(&self, delta: i64, order: Ordering, self_handle: &SchedulerHandle) -> (i64, bool) {
        let new_value = self.value.fetch_add(delta, order) + delta;
        let woke_self = self.notify_waiters(new_value, Some(self_handle));
        (new_value, woke_self)
    }

    pub fn compare_exchange(&self, current: i64, new: i64, success: Ordering, failure: Ordering) -> Result<i64, i64> {
        let result = self.value.compare_exchange(current, new, success, failure);
        if result.is_ok() {
            self.notify_waiters(new, None);
        }
        result
    }

    pub fn start_ts(&self) -> u64 {
        self.start_ts.load(Ordering::Relaxed)
    }

    pub fn set_start_ts(&self, ts: u64) {
        self.start_ts.store(ts, Ordering::Relaxed);
    }

    pub fn end_ts(&self) -> u64 {
        self.end_ts.load(Ordering::Relaxed)
    }

    pub fn set_end_ts(&self, ts: u64) {
        self.end_ts.store(ts, Ordering::Relaxed);
    }

    /// Bounded spin-yield wait, used by host-side drivers and tests, not by
    /// the device tick path itself (which never blocks — it parks entries
    /// on the wake list instead, see `scheduler::tick`).
    pub fn wait(&self, condition: WaitCondition) {
        while !condition.is_satisfied(self.value.load(Ordering::Acquire)) {
            spin_yield();
        }
    }

    /// Registers `scheduler` against this signal if `threshold` is not
    /// already satisfied; returns whether it enrolled.
    pub fn update_wait(&self, scheduler: &SchedulerHandle, threshold: i64) -> bool {
        let current = self.value.load(Ordering::Acquire);
        if current <= threshold {
            return false;
        }
        self.wake_list.lock().push(WakeListEntry {
            scheduler: scheduler.clone(),
            threshold,
        });
        true
    }

    /// Wakes every parked entry the new value satisfies, returning whether
    /// `self_handle` (when given) was one of them.
    fn notify_waiters(&self, new_value: i64, self_handle: Option<&SchedulerHandle>) -> bool {
        let mut woke_self = false;
        let mut list = self.wake_list.lock();
        list.retain(|entry| {
            if new_value <= entry.threshold {
                entry.scheduler.wake();
                if let Some(handle) = self_handle {
                    if entry.scheduler.is_same(handle) {
                        woke_self = true;
                    }
                }
                false
            } else {
                true
            }
        });
        woke_self
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use crate::config::Limits;

    #[test]
    fn null_signal_id_is_zero() {
        assert_eq!(NULL_SIGNAL_ID, 0);
    }

    #[test]
    fn update_wait_enrolls_when_unsatisfied() {
        let sig = Signal::new(SignalKind::User, 10);
        let scheduler = Scheduler::new(Limits::default());
        assert!(sig.update_wait(&scheduler.handle(), 0));
        assert!(!scheduler.handle().take_pending());
        sig.store(0, Ordering::Release);
        assert!(scheduler.handle().take_pending());
    }

    #[test]
    fn update_wait_returns_false_when_already_satisfied() {
        let sig = Signal::new(SignalKind::User, 0);
        let scheduler = Scheduler::new(Limits::default());
        assert!(!sig.update_wait(&scheduler.handle(), 0));
    }
}
