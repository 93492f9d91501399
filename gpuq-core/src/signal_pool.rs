//! Lock-free pool of opaque signals, allocated up front by the host and
//! acquired/released by device code.
//!
//! A Treiber stack of free slot ids over a fixed `Signal` array, sized once
//! at construction so acquire/release never allocate.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::CoreError;
use crate::signal::{Signal, SignalId, SignalKind, NULL_SIGNAL_ID};
use gpuq_abi::ExhaustedResource;

/// Sentinel meaning "the free list is empty" — slot id 0 is reserved for
/// the null signal and never occupies a real array slot.
const EMPTY: u32 = 0;

pub struct SignalPool {
    signals: Box<[Signal]>,
    free_next: Box<[AtomicU32]>,
    free_head: AtomicU32,
    capacity: u32,
}

impl SignalPool {
    pub fn new(capacity: u32) -> Self {
        let signals: Vec<Signal> = (0..capacity).map(|_| Signal::new(SignalKind::User, 0)).collect();
        let free_next: Vec<AtomicU32> = (0..capacity)
            .map(|i| AtomicU32::new(if i + 2 <= capacity { i + 2 } else { EMPTY }))
            .collect();
        Self {
            signals: signals.into_boxed_slice(),
            free_next: free_next.into_boxed_slice(),
            free_head: AtomicU32::new(if capacity > 0 { 1 } else { EMPTY }),
            capacity,
        }
    }

    /// Acquires a free signal id (1-indexed; 0 stays reserved for
    /// `NULL_SIGNAL_ID`).
    pub fn acquire(&self, kind: SignalKind, initial_value: i64) -> Result<SignalId, CoreError> {
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            if head == EMPTY {
                return Err(CoreError::Exhausted {
                    resource: ExhaustedResource::SignalPool,
                    capacity: self.capacity,
                });
            }
            let next = self.free_next[(head - 1) as usize].load(Ordering::Relaxed);
            if self
                .free_head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                let signal = &self.signals[(head - 1) as usize];
                signal.store(initial_value, Ordering::Release);
                let _ = kind;
                return Ok(head);
            }
        }
    }

    pub fn release(&self, id: SignalId) {
        assert_ne!(id, NULL_SIGNAL_ID, "cannot release the null signal");
        loop {
            let head = self.free_head.load(Ordering::Relaxed);
            self.free_next[(id - 1) as usize].store(head, Ordering::Relaxed);
            if self
                .free_head
                .compare_exchange_weak(head, id, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn get(&self, id: SignalId) -> Option<&Signal> {
        if id == NULL_SIGNAL_ID {
            None
        } else {
            self.signals.get((id - 1) as usize)
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_release_round_trips_same_slot_pool() {
        let pool = SignalPool::new(4);
        let a = pool.acquire(SignalKind::User, 1).unwrap();
        let b = pool.acquire(SignalKind::User, 1).unwrap();
        assert_ne!(a, b);
        pool.release(a);
        let c = pool.acquire(SignalKind::User, 1).unwrap();
        assert_eq!(a, c);
        let _ = b;
    }

    #[test]
    fn exhaustion_reports_capacity() {
        let pool = SignalPool::new(1);
        let _first = pool.acquire(SignalKind::User, 0).unwrap();
        let err = pool.acquire(SignalKind::User, 0).unwrap_err();
        assert_eq!(err, CoreError::Exhausted { resource: ExhaustedResource::SignalPool, capacity: 1 });
    }
}
