//! # Transfer Statistics
//!
//! Advisory counters for one socket instance. The worker thread and the
//! calling threads update them with relaxed atomics; correctness never
//! depends on them. Snapshots serialize to JSON for export.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

use serde::Serialize;

// ─── Live Counters ───────────────────────────────────────────────────────────

/// Shared mutable counters. Incremented by the send worker, by `sendto` on
/// queue-full drops, and by `recvfrom` on the receive path.
#[derive(Debug, Default)]
pub struct SocketStats {
    /// Batches fully transmitted (all `n` fragments sent).
    pub send_batch: AtomicU64,
    /// Batches completed on the receive side.
    pub recv_batch: AtomicU64,
    /// Batches dropped: queue-full rejections plus mid-batch send aborts.
    pub send_drop: AtomicU64,
    /// Fragments that exhausted their retry budget.
    pub send_fail: AtomicU64,
    /// `sendto` calls rejected because the queue was full.
    pub queue_full: AtomicU64,
    /// Batches that reached the decode threshold but failed to reconstruct.
    pub decode_fail: AtomicU64,
    /// Sum of enqueue→transmit delays, in microseconds.
    pub send_total_delay_us: AtomicU64,
}

impl SocketStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Relaxed);
    }

    pub fn add_send_delay_us(&self, delay_us: u64) {
        self.send_total_delay_us.fetch_add(delay_us, Relaxed);
    }

    /// Consistent-enough point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let send_batch = self.send_batch.load(Relaxed);
        let total_delay_us = self.send_total_delay_us.load(Relaxed);
        StatsSnapshot {
            send_batch,
            recv_batch: self.recv_batch.load(Relaxed),
            send_drop: self.send_drop.load(Relaxed),
            send_fail: self.send_fail.load(Relaxed),
            queue_full: self.queue_full.load(Relaxed),
            decode_fail: self.decode_fail.load(Relaxed),
            avg_send_delay: if send_batch == 0 {
                0.0
            } else {
                total_delay_us as f64 / send_batch as f64 / 1_000_000.0
            },
        }
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// Point-in-time statistics returned by `MosaicSocket::stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub send_batch: u64,
    pub recv_batch: u64,
    pub send_drop: u64,
    pub send_fail: u64,
    pub queue_full: u64,
    pub decode_fail: u64,
    /// Mean enqueue→transmit delay in seconds across successful batches.
    pub avg_send_delay: f64,
}
