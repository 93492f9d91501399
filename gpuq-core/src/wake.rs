//! Wake pool (per-scheduler registered waits) and wake set (per-tick
//! accumulator of wake targets).

use alloc::vec::Vec;

use crate::error::CoreError;
use crate::scheduler::SchedulerHandle;
use crate::signal::SignalId;
use gpuq_abi::ExhaustedResource;

#[derive(Debug, Clone, Copy)]
pub struct WakePoolEntry {
    pub signal_id: SignalId,
    pub minimum_value: i64,
    pub last_observed_value: i64,
}

/// Fixed-capacity open-addressed map keyed by signal identity` pair).
pub struct WakePool {
    slots: Vec<Option<WakePoolEntry>>,
    capacity: u32,
}

impl WakePool {
    pub fn new(capacity: u32) -> Self {
        Self {
            slots: alloc::vec![None; capacity as usize],
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Finds or creates the entry for `signal_id`, folding `required_value`
    /// into the existing minimum if one is already registered.
    pub fn reserve(&mut self, signal_id: SignalId, required_value: i64) -> Result<usize, CoreError> {
        if let Some(index) = self.slots.iter().position(|slot| matches!(slot, Some(e) if e.signal_id == signal_id)) {
            let entry = self.slots[index].as_mut().unwrap();
            entry.minimum_value = entry.minimum_value.min(required_value);
            return Ok(index);
        }
        let free = self.slots.iter().position(|slot| slot.is_none()).ok_or(CoreError::Exhausted {
            resource: ExhaustedResource::WakePool,
            capacity: self.capacity,
        })?;
        self.slots[free] = Some(WakePoolEntry {
            signal_id,
            minimum_value: required_value,
            last_observed_value: i64::MAX,
        });
        Ok(free)
    }

    pub fn release(&mut self, index: usize) {
        self.slots[index] = None;
    }

    pub fn observe(&mut self, index: usize, value: i64) {
        if let Some(entry) = self.slots[index].as_mut() {
            entry.last_observed_value = value;
        }
    }

    pub fn get(&self, index: usize) -> Option<&WakePoolEntry> {
        self.slots[index].as_ref()
    }
}

/// Per-tick deduplicating accumulator of wake targets.
#[derive(Default)]
pub struct WakeSet {
    targets: Vec<SchedulerHandle>,
}

impl WakeSet {
    pub fn new() -> Self {
        Self { targets: Vec::new() }
    }

    pub fn record(&mut self, target: SchedulerHandle) {
        if !self.targets.iter().any(|existing| existing.is_same(&target)) {
            self.targets.push(target);
        }
    }

    /// Posts a scheduler-enqueue wake to every distinct target and reports
    /// whether `self_handle` was among them, so the caller knows to
    /// re-enqueue its own tick.
    pub fn flush(self, self_handle: &SchedulerHandle) -> bool {
        let mut woke_self = false;
        for target in &self.targets {
            if target.is_same(self_handle) {
                woke_self = true;
            } else {
                target.wake();
            }
        }
        woke_self
    }
}
