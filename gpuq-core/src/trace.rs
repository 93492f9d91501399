//! Trace ring buffer: a variable-length byte log plus a small ring of
//! pre-allocated query signals used to timestamp dispatches.

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU32, Ordering};

use spinning_top::Spinlock;

use crate::atomics::spin_yield;
use crate::error::CoreError;
use crate::signal::{SignalId, SignalKind};
use crate::signal_pool::SignalPool;
use ring_buffer::RingBuffer;

/// A reservation returned by `reserve_range`: the monotonic offset the
/// payload starts at. Masked modular indexing (`offset & (capacity - 1)`)
/// turns it into a real position in the backing buffer.
#[derive(Debug, Clone, Copy)]
pub struct TraceReservation {
    pub offset: u32,
    pub len: u32,
}

/// Byte-oriented SPSC-producer-side ring: many work-items reserve disjoint
/// ranges concurrently, one host-side reader drains committed bytes.
pub struct TraceRingBuffer {
    buf: UnsafeCell<Box<[u8]>>,
    capacity: u32,
    write_reserve_offset: AtomicU32,
    write_commit_offset: AtomicU32,
    read_commit_offset: AtomicU32,
    pub executor_id: u32,
}

// SAFETY: `reserve_range` only ever hands out disjoint `[offset, offset+len)`
// windows (mod capacity) to its callers, who are the only ones permitted to
// write into that window — mirrors the data-parallel issue model where
// disjointness is guaranteed by the recorder, not by locking.
unsafe impl Sync for TraceRingBuffer {}

impl TraceRingBuffer {
    pub fn new(capacity: u32, executor_id: u32) -> Self {
        assert!(capacity.is_power_of_two(), "trace ring capacity must be a power of two");
        Self {
            buf: UnsafeCell::new(alloc::vec![0u8; capacity as usize].into_boxed_slice()),
            capacity,
            write_reserve_offset: AtomicU32::new(0),
            write_commit_offset: AtomicU32::new(0),
            read_commit_offset: AtomicU32::new(0),
            executor_id,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn mask(&self, offset: u32) -> u32 {
        offset & (self.capacity - 1)
    }

    /// Reserves `len` bytes, spin-yielding while the reservation would
    /// overrun the last byte the host has acknowledged reading.
    pub fn reserve_range(&self, len: u32) -> TraceReservation {
        let start = self.write_reserve_offset.fetch_add(len, Ordering::Relaxed);
        while start.wrapping_add(len).wrapping_sub(self.read_commit_offset.load(Ordering::Acquire)) >= self.capacity {
            spin_yield();
        }
        TraceReservation { offset: start, len }
    }

    /// Writes `data` into a previously reserved window, splitting the copy
    /// at the wrap boundary so the logical payload stays contiguous to the
    /// reader even though the backing array wrapped underneath it.
    pub fn write_at(&self, reservation: TraceReservation, data: &[u8]) {
        debug_assert_eq!(data.len() as u32, reservation.len);
        let start = self.mask(reservation.offset);
        // SAFETY: caller owns the disjoint `[offset, offset+len)` window by
        // construction of `reserve_range`.
        let dst = unsafe { &mut *self.buf.get() };
        let first_len = (self.capacity - start).min(reservation.len);
        dst[start as usize..start as usize + first_len as usize].copy_from_slice(&data[..first_len as usize]);
        if first_len < reservation.len {
            let rest = reservation.len - first_len;
            dst[..rest as usize].copy_from_slice(&data[first_len as usize..]);
        }
    }

    /// Publishes every byte reserved so far, returning whether there was
    /// anything new to publish.
    pub fn commit_range(&self) -> bool {
        let reserved = self.write_reserve_offset.load(Ordering::Acquire);
        let previous = self.write_commit_offset.swap(reserved, Ordering::Release);
        previous != reserved
    }

    /// Host-side acknowledgement that bytes up to `offset` have been read.
    pub fn advance_read(&self, offset: u32) {
        self.read_commit_offset.store(offset, Ordering::Release);
    }

    pub fn write_commit_offset(&self) -> u32 {
        self.write_commit_offset.load(Ordering::Acquire)
    }

    pub fn read_commit_offset(&self) -> u32 {
        self.read_commit_offset.load(Ordering::Acquire)
    }
}

/// Writes one variable-length trace record: an 8-bit `event_type`, a
/// 64-bit agent-steady-counter timestamp, then the caller's payload.
pub fn write_trace_event(ring: &TraceRingBuffer, kind: gpuq_abi::TraceEventKind, timestamp: u64, payload: &[u8]) {
    let len = 1 + 8 + payload.len();
    let mut record = alloc::vec::Vec::with_capacity(len);
    record.push(kind as u8);
    record.extend_from_slice(&timestamp.to_le_bytes());
    record.extend_from_slice(payload);
    let reservation = ring.reserve_range(len as u32);
    ring.write_at(reservation, &record);
}

/// Ring of pre-allocated `USER` query signals, reused by `crates/ring-buffer`'s allocation-free
/// recycling API rather than a bespoke container.
pub struct QueryRing {
    ring: Spinlock<RingBuffer<SignalId>>,
}

impl QueryRing {
    pub fn new(capacity: u32) -> Self {
        Self {
            ring: Spinlock::new(RingBuffer::new(capacity as usize)),
        }
    }

    /// Acquires `count` contiguous query-signal slots, recycling the oldest
    /// entries once the ring is full instead of growing without bound.
    pub fn acquire(&self, pool: &SignalPool, count: u32) -> Result<alloc::vec::Vec<SignalId>, CoreError> {
        let mut ring = self.ring.lock();
        let mut ids = alloc::vec::Vec::with_capacity(count as usize);
        for _ in 0..count {
            if let Some(evicted) = ring.next_evictable() {
                pool.release(*evicted);
            }
            let id = pool.acquire(SignalKind::User, 0)?;
            ring.push_or_recycle(|slot| match slot {
                Some(existing) => {
                    *existing = id;
                    None
                }
                None => Some(id),
            });
            ids.push(id);
        }
        Ok(ids)
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn commit_range_reports_new_bytes_once() {
        let ring = TraceRingBuffer::new(64, 0);
        assert!(!ring.commit_range());
        let reservation = ring.reserve_range(16);
        ring.write_at(reservation, &[1u8; 16]);
        assert!(ring.commit_range());
        assert!(!ring.commit_range());
    }

    #[test]
    fn wraparound_write_is_contiguous_to_the_reader() {
        let ring = TraceRingBuffer::new(16, 0);
        let first = ring.reserve_range(12);
        ring.write_at(first, &[0xAAu8; 12]);
        ring.advance_read(12);
        let second = ring.reserve_range(8);
        ring.write_at(second, &[0xBBu8; 8]);
        assert!(second.offset + second.len > ring.capacity());
    }

    /// 320-byte records into a 4096-byte ring: after 13 events the reserve
    /// cursor has wrapped past the base address, yet every record reads
    /// back byte-for-byte as written, split at the wrap boundary or not.
    #[test]
    fn repeated_320_byte_events_wrap_and_stay_contiguous() {
        let ring = TraceRingBuffer::new(4096, 0);
        let mut expected = alloc::vec::Vec::new();
        for i in 0..13u8 {
            let record = alloc::vec![i; 320];
            let reservation = ring.reserve_range(320);
            ring.write_at(reservation, &record);
            expected.push((reservation, record));
        }
        assert!(ring.commit_range());
        assert!(!ring.commit_range());
        assert_eq!(ring.write_commit_offset(), 13 * 320);
        assert!(ring.write_commit_offset() > ring.capacity());

        let buf = unsafe { &*ring.buf.get() };
        for (reservation, record) in expected {
            let start = (reservation.offset & (ring.capacity() - 1)) as usize;
            let first_len = (ring.capacity() as usize - start).min(record.len());
            assert_eq!(&buf[start..start + first_len], &record[..first_len]);
            if first_len < record.len() {
                assert_eq!(&buf[..record.len() - first_len], &record[first_len..]);
            }
        }
    }
}
