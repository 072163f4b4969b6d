//! # Send Pipeline
//!
//! The I/O-free half of the send path: queue entries, batch-id allocation,
//! and per-fragment framing. The socket layer owns the actual UDP socket and
//! the worker thread that drains the queue through these helpers.

use std::net::SocketAddr;
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use quanta::Instant;

use crate::codec::EncodedBatch;
use crate::wire::{FragmentHeader, HEADER_LEN};

// ─── Queue Entry ─────────────────────────────────────────────────────────────

/// One enqueued message awaiting the worker.
///
/// `(k, n)` are fixed at `sendto` time so per-call [`SendOptions`] don't have
/// to travel with the entry.
///
/// [`SendOptions`]: crate::codec::SendOptions
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub data: Bytes,
    pub addr: SocketAddr,
    pub k: u8,
    pub n: u8,
    pub enqueued_at: Instant,
}

// ─── Batch Id Allocation ─────────────────────────────────────────────────────

/// Mutex-protected monotonic batch-id counter, wrapping at 2³².
///
/// The first allocated id is 1. Allocation must stay safe from any thread;
/// today the worker is the only caller.
#[derive(Debug, Default)]
pub struct BatchIdGen {
    counter: Mutex<u32>,
}

impl BatchIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u32 {
        let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
        *counter = counter.wrapping_add(1);
        *counter
    }
}

// ─── Fragment Framing ────────────────────────────────────────────────────────

/// Serialize every fragment of a batch into wire-format datagrams, ordered
/// `0..n-1`. Each datagram is the 13-byte header followed by exactly
/// `block_size` payload bytes.
pub fn frame_batch(client_id: u32, batch_id: u32, batch: &EncodedBatch) -> Vec<Bytes> {
    batch
        .fragments
        .iter()
        .enumerate()
        .map(|(idx, fragment)| {
            let header = FragmentHeader {
                client_id,
                batch_id,
                idx: idx as u8,
                k: batch.k,
                n: batch.n,
                orig_len: batch.orig_len,
            };
            let mut buf = BytesMut::with_capacity(HEADER_LEN + fragment.len());
            header.encode(&mut buf);
            buf.extend_from_slice(fragment);
            buf.freeze()
        })
        .collect()
}
