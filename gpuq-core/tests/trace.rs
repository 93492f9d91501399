//! S5 — trace ring wrap: 320-byte events into a 4096-byte ring, observed
//! through the host-facing `commit_range`/offset API.

use gpuq_abi::TraceEventKind;
use gpuq_core::trace::write_trace_event;
use gpuq_core::TraceRingBuffer;

const EVENT_PAYLOAD_LEN: usize = 320 - 1 - 8;

#[test]
fn commit_range_fires_once_per_batch_across_the_wrap() {
    let ring = TraceRingBuffer::new(4096, 0);
    let payload = vec![0xABu8; EVENT_PAYLOAD_LEN];

    for i in 0..13u64 {
        write_trace_event(&ring, TraceEventKind::MessageLiteral, i, &payload);
    }

    assert!(ring.commit_range(), "first flush after a batch must report new bytes");
    assert!(!ring.commit_range(), "a second flush with nothing new must report none");

    let committed = ring.write_commit_offset();
    assert_eq!(committed, 13 * 320);
    assert!(committed > ring.capacity(), "13 events of 320 bytes must wrap past the 4096-byte base");

    ring.advance_read(committed);

    for i in 13..20u64 {
        write_trace_event(&ring, TraceEventKind::MessageLiteral, i, &payload);
    }
    assert!(ring.commit_range());
    assert!(!ring.commit_range());
}
