//! Power-of-two ring of 64-byte AQL packets with a doorbell.

use alloc::boxed::Box;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use crate::atomics::spin_yield;
use gpuq_abi::{PacketHeader, RawPacket, INVALID_PACKET, PACKET_SIZE};

pub struct AqlQueue {
    pub id: u32,
    slots: UnsafeCell<Box<[RawPacket]>>,
    size: u64,
    read_index: AtomicU64,
    write_index: AtomicU64,
    /// Written with the new write-index to wake the packet processor.
    /// The store itself is the wake event.
    pub doorbell: AtomicU64,
}

// SAFETY: every index handed out by `reserve` is disjoint modulo `size`
// from every other live reservation;
// `read_index`/`write_index`/`doorbell` are themselves atomics.
unsafe impl Sync for AqlQueue {}

impl AqlQueue {
    pub fn new(size: u64, id: u32) -> Self {
        assert!(size.is_power_of_two(), "AQL queue size must be a power of two");
        let slots: Box<[RawPacket]> = alloc::vec![INVALID_PACKET; size as usize].into_boxed_slice();
        Self {
            id,
            slots: UnsafeCell::new(slots),
            size,
            read_index: AtomicU64::new(0),
            write_index: AtomicU64::new(0),
            doorbell: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn mask(&self, index: u64) -> usize {
        (index & (self.size - 1)) as usize
    }

    pub fn load_read_index(&self, order: Ordering) -> u64 {
        self.read_index.load(order)
    }

    pub fn load_write_index(&self, order: Ordering) -> u64 {
        self.write_index.load(order)
    }

    pub fn store_write_index(&self, value: u64, order: Ordering) {
        self.write_index.store(value, order);
    }

    pub fn cas_write_index(&self, current: u64, new: u64, success: Ordering, failure: Ordering) -> Result<u64, u64> {
        self.write_index.compare_exchange(current, new, success, failure)
    }

    /// Advances the read index; called by whatever drains completed
    /// packets (the demo's simulated packet processor, or a test).
    pub fn advance_read_index(&self, new_value: u64, order: Ordering) {
        self.read_index.store(new_value, order);
    }

    /// Reserves `n` contiguous slots, spinning while the reservation would
    /// outrun the packet processor by more than `size`.
    pub fn reserve(&self, n: u64) -> u64 {
        let start = self.write_index.fetch_add(n, Ordering::Relaxed);
        while start + n - self.read_index.load(Ordering::Acquire) > self.size {
            spin_yield();
        }
        start
    }

    /// Writes `packet`'s body, then atomically transitions the slot's
    /// header from INVALID to its real type with release ordering — the
    /// publication primitive the packet processor's retirement loop relies on.
    pub fn emplace<P>(&self, index: u64, packet: &P)
    where
        P: zerocopy::IntoBytes + zerocopy::Immutable,
    {
        let bytes = packet.as_bytes();
        debug_assert_eq!(bytes.len(), PACKET_SIZE);
        // SAFETY: `index`'s slot is exclusively owned by this issuer.
        let slot = unsafe { &mut (*self.slots.get())[self.mask(index)] };
        slot[2..].copy_from_slice(&bytes[2..]);
        self.publish_header(index, u16::from_le_bytes([bytes[0], bytes[1]]), Ordering::Release);
    }

    /// Writes a packet's body but publishes INVALID instead of its real
    /// header, leaving the slot blocked for the packet processor until a
    /// later `patch_body_and_publish` call (the indirect-dynamic dispatch
    /// fixup).
    pub fn stage_invalid<P>(&self, index: u64, packet: &P)
    where
        P: zerocopy::IntoBytes + zerocopy::Immutable,
    {
        let bytes = packet.as_bytes();
        debug_assert_eq!(bytes.len(), PACKET_SIZE);
        let slot = unsafe { &mut (*self.slots.get())[self.mask(index)] };
        slot[2..].copy_from_slice(&bytes[2..]);
        self.publish_header(index, PacketHeader::INVALID, Ordering::Release);
    }

    /// Atomically overwrites just the header — used by the indirect-dispatch
    /// fixup kernel, which patches `grid_size` in an already-INVALID slot
    /// then transitions it without touching the rest of the body again.
    pub fn patch_body_and_publish<F>(&self, index: u64, header_bits: u16, patch: F)
    where
        F: FnOnce(&mut RawPacket),
    {
        // SAFETY: see `emplace`.
        let slot = unsafe { &mut (*self.slots.get())[self.mask(index)] };
        patch(slot);
        self.publish_header(index, header_bits, Ordering::Release);
    }

    pub fn publish_header(&self, index: u64, header_bits: u16, order: Ordering) {
        // SAFETY: the header occupies the first two bytes of every packet
        // and is never aliased mutably outside this atomic view.
        let ptr = unsafe { (*self.slots.get())[self.mask(index)].as_mut_ptr() as *mut u16 };
        unsafe { AtomicU16::from_ptr(ptr) }.store(header_bits, order);
    }

    pub fn read_header(&self, index: u64, order: Ordering) -> PacketHeader {
        let ptr = unsafe { (*self.slots.get())[self.mask(index)].as_ptr() as *mut u16 };
        let bits = unsafe { AtomicU16::from_ptr(ptr) }.load(order);
        PacketHeader::from_bits(bits)
    }

    pub fn read_raw(&self, index: u64) -> RawPacket {
        unsafe { (*self.slots.get())[self.mask(index)] }
    }

    /// Resets a slot back to INVALID, modeling the packet processor
    /// releasing it once consumed, so the slot can be reserved again after
    /// the ring wraps.
    pub fn reset_invalid(&self, index: u64) {
        let slot = unsafe { &mut (*self.slots.get())[self.mask(index)] };
        *slot = INVALID_PACKET;
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use gpuq_abi::{BarrierPacket, FenceScope, PacketKind};

    #[test]
    fn reserved_slots_start_invalid() {
        let queue = AqlQueue::new(4, 0);
        let header = queue.read_header(0, Ordering::Acquire);
        assert_eq!(header.kind, PacketKind::Invalid);
    }

    #[test]
    fn emplace_publishes_the_real_header() {
        let queue = AqlQueue::new(4, 0);
        let index = queue.reserve(1);
        let packet = BarrierPacket::empty(true, FenceScope::Agent, FenceScope::System, 0);
        queue.emplace(index, &packet);
        let header = queue.read_header(index, Ordering::Acquire);
        assert_eq!(header.kind, PacketKind::BarrierAnd);
        assert!(header.barrier_bit);
    }
}
