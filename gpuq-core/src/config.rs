//! Per-instance sizing knobs for the fixed-capacity tables (wake pool,
//! signal pool, execution queue, trace ring).
//!
//! `panda-kernel` hard-codes its tuning constants at their point of use
//! (`TIME_SLICE_MS`, `panda_abi::MAX_MAILBOX_EVENTS`), fine for a single
//! scheduler instance per kernel. This crate's `Scheduler` is instantiated
//! per hardware queue, so the same constants become construction-time
//! fields instead.

/// Fixed-capacity sizing for one scheduler/queue instance.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Entries in the signal pool.
    pub signal_pool_capacity: u32,
    /// Entries in the wake pool; one per outstanding `(scheduler, semaphore)`
    /// pair.
    pub wake_pool_capacity: u32,
    /// Slots on the execution (AQL) queue. Must be a power of two.
    pub execution_queue_size: u32,
    /// Slots on the host post queue. Must be a power of two.
    pub host_post_queue_size: u32,
    /// Bytes in the trace ring buffer. Must be a power of two.
    pub trace_ring_capacity: u32,
    /// Query-signal slots in the trace query ring.
    pub trace_query_capacity: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            signal_pool_capacity: 256,
            wake_pool_capacity: 128,
            execution_queue_size: 1024,
            host_post_queue_size: 64,
            trace_ring_capacity: 1 << 16,
            trace_query_capacity: 256,
        }
    }
}

impl Limits {
    /// Validates the power-of-two fields this crate's ring structures rely
    /// on for masked modular indexing.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.execution_queue_size.is_power_of_two() {
            return Err("execution_queue_size must be a power of two");
        }
        if !self.host_post_queue_size.is_power_of_two() {
            return Err("host_post_queue_size must be a power of two");
        }
        if !self.trace_ring_capacity.is_power_of_two() {
            return Err("trace_ring_capacity must be a power of two");
        }
        Ok(())
    }
}
