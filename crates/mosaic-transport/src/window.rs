//! # Processed-Batch Window
//!
//! Bounded FIFO of recently completed batch keys plus a mirrored set for
//! O(1) membership checks. This window is the only barrier against
//! re-emitting a batch when late duplicates arrive after decode, so the
//! deque and the set must stay in lockstep on every append and eviction.

use std::collections::{HashSet, VecDeque};

use crate::wire::BatchKey;

/// Bounded memory of recently completed batch keys, oldest evicted first.
#[derive(Debug)]
pub struct ProcessedWindow {
    order: VecDeque<BatchKey>,
    members: HashSet<BatchKey>,
    capacity: usize,
}

impl ProcessedWindow {
    pub fn new(capacity: usize) -> Self {
        ProcessedWindow {
            order: VecDeque::with_capacity(capacity.min(1024)),
            members: HashSet::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Record a completed batch, evicting the oldest key once full.
    pub fn insert(&mut self, key: BatchKey) {
        if !self.members.insert(key) {
            return; // already tracked; keep its original eviction slot
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.members.remove(&old);
            }
        }
    }

    /// O(1) membership check.
    pub fn contains(&self, key: &BatchKey) -> bool {
        self.members.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
