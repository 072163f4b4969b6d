//! # Batch Reassembler
//!
//! Pure logic — no I/O. Accepts raw datagrams from the socket layer, groups
//! fragments by `(client_id, batch_id)`, and decodes a batch as soon as any
//! `k` of its fragments have arrived. Completed and expired batches are
//! remembered in the processed window so late duplicates are discarded
//! instead of re-emitted.
//!
//! The socket layer owns the UDP socket and maps [`IngestOutcome`]s to
//! statistics and observer hooks.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use quanta::Instant;
use tracing::debug;

use crate::codec::{self, CodecError};
use crate::window::ProcessedWindow;
use crate::wire::{BatchKey, FragmentHeader, WireError, HEADER_LEN};

// ─── Ingest Outcome ──────────────────────────────────────────────────────────

/// Result of feeding one datagram into the reassembler.
#[derive(Debug)]
pub enum IngestOutcome {
    /// A batch reached its decode threshold; the message is complete.
    Delivered(Bytes),
    /// Fragment stored; its batch is still below the threshold.
    Buffered,
    /// Fragment of a batch already completed or expired.
    Duplicate,
    /// Header failed to decode.
    Invalid(WireError),
    /// Fragment contradicts the batch's governing header (index out of
    /// range, conflicting `k`/`n`/`orig_len`, or wrong payload size).
    Mismatch,
    /// Decode threshold reached but reconstruction failed; the batch is
    /// dropped and its key marked processed.
    DecodeFailed { key: BatchKey, error: CodecError },
}

// ─── Reassembly State ────────────────────────────────────────────────────────

/// In-flight state for one batch. The header of the first observed fragment
/// governs `k`, `n`, and `orig_len`; conflicting later arrivals are dropped.
#[derive(Debug)]
struct PendingBatch {
    k: u8,
    n: u8,
    orig_len: u16,
    /// idx → payload; a repeated index overwrites (later wins — fragments
    /// are deterministic, so replacement is benign).
    fragments: HashMap<u8, Bytes>,
    first_seen: Instant,
}

impl PendingBatch {
    fn new(header: &FragmentHeader, now: Instant) -> Self {
        PendingBatch {
            k: header.k,
            n: header.n,
            orig_len: header.orig_len,
            fragments: HashMap::with_capacity(header.k as usize),
            first_seen: now,
        }
    }
}

/// Per-batch fragment collector with duplicate suppression and expiry.
#[derive(Debug)]
pub struct Reassembler {
    batches: HashMap<BatchKey, PendingBatch>,
    processed: ProcessedWindow,
    batch_timeout: Duration,
}

impl Reassembler {
    pub fn new(batch_timeout: Duration, processed_maxlen: usize) -> Self {
        Reassembler {
            batches: HashMap::new(),
            processed: ProcessedWindow::new(processed_maxlen),
            batch_timeout,
        }
    }

    /// Evict every in-flight batch whose first fragment is older than the
    /// batch timeout. Expired keys join the processed window: the batch is
    /// dead, and stragglers must not resurrect it under the same id.
    ///
    /// Returns the number of batches evicted.
    pub fn sweep_expired(&mut self, now: Instant) -> usize {
        let timeout = self.batch_timeout;
        let mut expired = Vec::new();
        self.batches.retain(|key, entry| {
            if now.duration_since(entry.first_seen) > timeout {
                expired.push(*key);
                false
            } else {
                true
            }
        });
        for key in &expired {
            debug!(?key, "batch timed out, removed from reassembly");
            self.processed.insert(*key);
        }
        expired.len()
    }

    /// Feed one received datagram.
    pub fn ingest(&mut self, datagram: &[u8], now: Instant) -> IngestOutcome {
        let header = match FragmentHeader::decode(&mut &datagram[..]) {
            Ok(header) => header,
            Err(error) => return IngestOutcome::Invalid(error),
        };
        let key = header.key();

        if self.processed.contains(&key) {
            return IngestOutcome::Duplicate;
        }

        if let Some(entry) = self.batches.get(&key) {
            if (entry.k, entry.n, entry.orig_len) != (header.k, header.n, header.orig_len) {
                return IngestOutcome::Mismatch;
            }
        } else if header.orig_len == 0 {
            // Nothing to decode; the first fragment alone completes the batch.
            self.processed.insert(key);
            return IngestOutcome::Delivered(Bytes::new());
        }

        if header.idx >= header.n {
            return IngestOutcome::Mismatch;
        }
        let payload = &datagram[HEADER_LEN..];
        if payload.len() != header.block_size() {
            return IngestOutcome::Mismatch;
        }

        let entry = self
            .batches
            .entry(key)
            .or_insert_with(|| PendingBatch::new(&header, now));
        entry
            .fragments
            .insert(header.idx, Bytes::copy_from_slice(payload));

        if entry.fragments.len() < entry.k as usize {
            return IngestOutcome::Buffered;
        }

        // Threshold reached — decode, then retire the key either way.
        let (ids, fragments): (Vec<u8>, Vec<Bytes>) = entry
            .fragments
            .iter()
            .map(|(&idx, fragment)| (idx, fragment.clone()))
            .unzip();
        let (k, n, orig_len) = (entry.k, entry.n, entry.orig_len as usize);

        self.batches.remove(&key);
        self.processed.insert(key);

        match codec::decode_blocks(k, n, &fragments, &ids) {
            Ok(blocks) => {
                debug!(?key, k, n, "batch reassembled");
                IngestOutcome::Delivered(codec::assemble(&blocks, orig_len))
            }
            Err(error) => IngestOutcome::DecodeFailed { key, error },
        }
    }

    /// Number of batches currently mid-reassembly.
    pub fn pending_batches(&self) -> usize {
        self.batches.len()
    }

    /// Number of keys remembered in the processed window.
    pub fn processed_len(&self) -> usize {
        self.processed.len()
    }
}
