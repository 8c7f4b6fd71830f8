//! Contiguous-boundary tracking over out-of-order completions

use std::collections::BTreeSet;

/// Tracks which started seqs are still outstanding along one dimension
/// (applied, or journaled).
///
/// Seqs must be started in increasing order. Completions may arrive in
/// any order. The boundary is the highest seq such that it and every
/// seq below it have completed.
#[derive(Debug, Clone, Default)]
pub struct SeqTracker {
    outstanding: BTreeSet<u64>,
    last_started: u64,
}

impl SeqTracker {
    /// Tracker whose boundary starts at `seq`
    pub fn starting_at(seq: u64) -> Self {
        Self {
            outstanding: BTreeSet::new(),
            last_started: seq,
        }
    }

    pub fn start(&mut self, seq: u64) {
        debug_assert!(seq > self.last_started, "seq {} started out of order", seq);
        self.last_started = seq;
        self.outstanding.insert(seq);
    }

    /// Returns false if `seq` was not outstanding
    pub fn finish(&mut self, seq: u64) -> bool {
        self.outstanding.remove(&seq)
    }

    pub fn boundary(&self) -> u64 {
        match self.outstanding.iter().next() {
            Some(first) => first - 1,
            None => self.last_started,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_outstanding(&self, seq: u64) -> bool {
        self.outstanding.contains(&seq)
    }
}
