//! # Integration tests: batch pipeline ↔ reassembler through the wire format
//!
//! These tests verify the full vertical stack:
//! plan → encode → frame → (impaired network) → reassemble
//!
//! No actual network I/O — the "network" is simulated by passing datagrams
//! directly. Impairment (loss, reorder, duplication, delay) is applied in
//! the middle.

use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;

use mosaic_transport::codec::{encode_message, plan_params, SendOptions};
use mosaic_transport::receiver::{IngestOutcome, Reassembler};
use mosaic_transport::sender::{frame_batch, BatchIdGen};
use mosaic_transport::wire::{FragmentHeader, HEADER_LEN};

const BATCH_TIMEOUT: Duration = Duration::from_secs(10);

// ─── Helpers ────────────────────────────────────────────────────────────────

fn default_reassembler() -> Reassembler {
    Reassembler::new(BATCH_TIMEOUT, 10_000)
}

/// Plan, encode, and frame one message the way the send worker does.
fn make_batch(client_id: u32, batch_id: u32, data: &[u8]) -> Vec<Bytes> {
    let (k, n) = plan_params(data.len(), &SendOptions::default());
    frame_batch(client_id, batch_id, &encode_message(data, k, n).unwrap())
}

/// Feed datagrams until one delivers; returns the message if any did.
fn feed_all(rx: &mut Reassembler, datagrams: &[Bytes], now: Instant) -> Option<Bytes> {
    let mut delivered = None;
    for dgram in datagrams {
        if let IngestOutcome::Delivered(msg) = rx.ingest(dgram, now) {
            assert!(delivered.is_none(), "batch delivered twice");
            delivered = Some(msg);
        }
    }
    delivered
}

// ─── Tiny Message, Zero Loss ────────────────────────────────────────────────

#[test]
fn tiny_message_zero_loss() {
    let datagrams = make_batch(0x1111, 1, b"hi");
    assert_eq!(datagrams.len(), 8, "k=4, n=8 for a tiny message");

    // On-the-wire observations: 13-byte header + 1 payload byte per
    // fragment (ceil(2/4) = 1), identical batch parameters everywhere.
    for (i, dgram) in datagrams.iter().enumerate() {
        assert_eq!(dgram.len(), HEADER_LEN + 1);
        let header = FragmentHeader::decode(&mut dgram.clone()).unwrap();
        assert_eq!(header.idx, i as u8);
        assert_eq!((header.k, header.n, header.orig_len), (4, 8, 2));
    }

    let mut rx = default_reassembler();
    let msg = feed_all(&mut rx, &datagrams, Instant::now()).expect("message should deliver");
    assert_eq!(&msg[..], b"hi");
}

// ─── Loss Recovery ──────────────────────────────────────────────────────────

#[test]
fn half_loss_recovery_6000_bytes() {
    let data: Vec<u8> = (0..6000u32).map(|i| (i * 31 % 251) as u8).collect();
    let datagrams = make_batch(0x2222, 1, &data);
    assert_eq!(datagrams.len(), 10, "ceil(6000/1400)=5 data + 5 parity");

    // Any 5-of-10 subset reconstructs; try several loss patterns.
    let survivor_sets: [[usize; 5]; 4] = [
        [0, 1, 2, 3, 4],  // parity lost
        [5, 6, 7, 8, 9],  // all data lost
        [0, 2, 4, 6, 8],  // alternating
        [1, 3, 5, 7, 9],  // alternating, offset
    ];
    for survivors in survivor_sets {
        let mut rx = default_reassembler();
        let kept: Vec<Bytes> = survivors.iter().map(|&i| datagrams[i].clone()).collect();
        let msg = feed_all(&mut rx, &kept, Instant::now())
            .unwrap_or_else(|| panic!("survivors {survivors:?} should reconstruct"));
        assert_eq!(&msg[..], &data[..]);
    }
}

#[test]
fn below_threshold_then_straggler_completes() {
    let datagrams = make_batch(0x3333, 1, b"needs four fragments");
    let mut rx = default_reassembler();
    let now = Instant::now();

    assert!(feed_all(&mut rx, &datagrams[..3], now).is_none());
    assert_eq!(rx.pending_batches(), 1);

    match rx.ingest(&datagrams[6], now) {
        IngestOutcome::Delivered(msg) => assert_eq!(&msg[..], b"needs four fragments"),
        other => panic!("fourth fragment should complete the batch, got {other:?}"),
    }
}

// ─── Duplicate Batch Replay ─────────────────────────────────────────────────

#[test]
fn replayed_batch_is_not_redelivered() {
    let datagrams = make_batch(0x4444, 9, b"x");
    let mut rx = default_reassembler();
    let now = Instant::now();

    assert!(feed_all(&mut rx, &datagrams, now).is_some());

    // Replay the entire batch "five seconds later".
    let later = now + Duration::from_secs(5);
    for dgram in &datagrams {
        assert!(
            matches!(rx.ingest(dgram, later), IngestOutcome::Duplicate),
            "replayed fragments must be discarded"
        );
    }
}

// ─── Expiry ─────────────────────────────────────────────────────────────────

#[test]
fn expired_batch_never_completes() {
    let datagrams = make_batch(0x5555, 3, b"partial forever");
    let mut rx = default_reassembler();
    let t0 = Instant::now();

    assert!(feed_all(&mut rx, &datagrams[..3], t0).is_none());

    let late = t0 + BATCH_TIMEOUT + Duration::from_millis(100);
    assert_eq!(rx.sweep_expired(late), 1);

    // The remaining fragments alone exceed the decode threshold, but the
    // batch id is spent; a fresh one would be required.
    assert!(feed_all(&mut rx, &datagrams[3..], late).is_none());
    assert_eq!(rx.pending_batches(), 0);
}

// ─── Cross-Batch Behavior ───────────────────────────────────────────────────

#[test]
fn interleaved_batches_deliver_independently() {
    let ids = BatchIdGen::new();
    let first = make_batch(0x6666, ids.next(), b"first message");
    let second = make_batch(0x6666, ids.next(), b"second message");

    let mut rx = default_reassembler();
    let now = Instant::now();
    let mut delivered = Vec::new();

    // Interleave, second batch ahead: no cross-batch ordering guarantee.
    for pair in second.iter().zip(&first) {
        for dgram in [pair.0, pair.1] {
            if let IngestOutcome::Delivered(msg) = rx.ingest(dgram, now) {
                delivered.push(msg);
            }
        }
    }

    assert_eq!(delivered.len(), 2);
    assert_eq!(&delivered[0][..], b"second message");
    assert_eq!(&delivered[1][..], b"first message");
}

#[test]
fn colliding_batch_ids_from_distinct_senders() {
    // Both senders allocate batch_id=1; distinct client ids keep the
    // batches disjoint.
    let a = make_batch(0xAAAA_0001, 1, b"message from A");
    let b = make_batch(0xBBBB_0002, 1, b"message from B");

    let mut rx = default_reassembler();
    let now = Instant::now();
    let msg_a = feed_all(&mut rx, &a, now).expect("A should deliver");
    let msg_b = feed_all(&mut rx, &b, now).expect("B should deliver");

    assert_eq!(&msg_a[..], b"message from A");
    assert_eq!(&msg_b[..], b"message from B");
}

#[test]
fn reversed_fragment_order_still_delivers() {
    let data = vec![0xC3u8; 3000];
    let datagrams = make_batch(0x7777, 2, &data);
    let reversed: Vec<Bytes> = datagrams.iter().rev().cloned().collect();

    let mut rx = default_reassembler();
    let msg = feed_all(&mut rx, &reversed, Instant::now()).expect("should deliver");
    assert_eq!(&msg[..], &data[..]);
}

#[test]
fn zero_length_message_round_trips() {
    let datagrams = make_batch(0x8888, 4, b"");
    let mut rx = default_reassembler();

    match rx.ingest(&datagrams[0], Instant::now()) {
        IngestOutcome::Delivered(msg) => assert!(msg.is_empty()),
        other => panic!("expected immediate empty delivery, got {other:?}"),
    }
}
