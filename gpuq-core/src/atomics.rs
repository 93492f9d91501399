//! Memory-order and memory-scope bookkeeping shared by every lock-free
//! structure in this crate (signals, queues, trace ring, pools).
//!
//! Every atomic site carries an explicit order *and* scope rather than
//! letting a target-language default leak in. Host hardware has no notion
//! of "agent" vs "system" scope the way the device does, so `MemoryScope`
//! here is bookkeeping rather than a codegen knob: it is threaded through
//! call sites and trace logging so the distinction stays visible in the
//! port, even though `core::sync` only gives us `Ordering`.

use core::hint;

/// Visibility radius of an atomic operation, independent of `Ordering`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryScope {
    /// Visible only within the issuing work-item.
    WorkItem,
    /// Visible to the owning work-group.
    WorkGroup,
    /// Visible to the whole device.
    Agent,
    /// Visible across every SVM-sharing agent, including the host.
    System,
}

/// A short spin-yield: a bounded busy-wait loop, never a true
/// descheduling primitive.
#[inline]
pub fn spin_yield() {
    #[cfg(feature = "std")]
    {
        std::thread::yield_now();
    }
    #[cfg(not(feature = "std"))]
    {
        hint::spin_loop();
    }
}

/// Agent-timestamp source (component table: "Atomics & Timing primitives").
/// Grounded on `panda-kernel/src/scheduler/rtc.rs`'s `RTC` wrapper around
/// `core::arch::x86_64::_rdtsc()`.
pub trait SteadyClock: Send + Sync {
    fn now(&self) -> u64;
}

#[cfg(target_arch = "x86_64")]
pub struct TscClock;

#[cfg(target_arch = "x86_64")]
impl SteadyClock for TscClock {
    fn now(&self) -> u64 {
        unsafe { core::arch::x86_64::_rdtsc() }
    }
}

/// A clock a test or the demo can drive by hand.
pub struct ManualClock(core::sync::atomic::AtomicU64);

impl ManualClock {
    pub fn new() -> Self {
        Self(core::sync::atomic::AtomicU64::new(0))
    }

    pub fn advance(&self, delta: u64) -> u64 {
        self.0.fetch_add(delta, core::sync::atomic::Ordering::Relaxed) + delta
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SteadyClock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(core::sync::atomic::Ordering::Relaxed)
    }
}
