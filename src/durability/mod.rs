//! Durability watermark
//!
//! An op is durable once it is applied and its journal record is acked,
//! or once a sync commit covers it. The watermark is the highest seq
//! such that every op at or below it is durable:
//!
//! ```text
//! journaled modes:  max(committed, min(applied_boundary, journaled_boundary))
//! journal = none:   committed
//! ```
//!
//! The watermark only ever moves forward. It is published through an
//! atomic so readers never block.

mod gate;
mod seq_tracker;

pub use gate::ApplyGate;
pub use seq_tracker::SeqTracker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::JournalMode;

#[derive(Debug)]
struct TrackerState {
    applied: SeqTracker,
    journaled: SeqTracker,
    committed: u64,
}

/// Engine-wide applied / journaled / committed bookkeeping
#[derive(Debug)]
pub struct DurabilityTracker {
    mode: JournalMode,
    state: Mutex<TrackerState>,
    watermark: AtomicU64,
    cond: Condvar,
}

impl DurabilityTracker {
    /// Tracker for a store whose ops through `mounted_seq` are already durable
    pub fn new(mode: JournalMode, mounted_seq: u64) -> Self {
        Self {
            mode,
            state: Mutex::new(TrackerState {
                applied: SeqTracker::starting_at(mounted_seq),
                journaled: SeqTracker::starting_at(mounted_seq),
                committed: mounted_seq,
            }),
            watermark: AtomicU64::new(mounted_seq),
            cond: Condvar::new(),
        }
    }

    /// Start tracking a freshly allocated seq. Seqs must be registered
    /// in allocation order.
    pub fn register(&self, seq: u64) {
        let mut state = self.state.lock();
        state.applied.start(seq);
        if self.mode.is_journaled() {
            state.journaled.start(seq);
        }
    }

    pub fn mark_applied(&self, seq: u64) {
        let mut state = self.state.lock();
        state.applied.finish(seq);
        self.publish(&state);
    }

    pub fn mark_journaled(&self, seq: u64) {
        let mut state = self.state.lock();
        state.journaled.finish(seq);
        self.publish(&state);
    }

    /// Record a successful sync commit through `seq`
    pub fn mark_committed(&self, seq: u64) {
        let mut state = self.state.lock();
        state.committed = state.committed.max(seq);
        self.publish(&state);
    }

    fn publish(&self, state: &TrackerState) {
        let durable = if self.mode.is_journaled() {
            state
                .committed
                .max(state.applied.boundary().min(state.journaled.boundary()))
        } else {
            state.committed
        };
        self.watermark.fetch_max(durable, Ordering::SeqCst);
        self.cond.notify_all();
    }

    /// Highest seq with every op at or below it durable
    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::SeqCst)
    }

    pub fn applied_boundary(&self) -> u64 {
        self.state.lock().applied.boundary()
    }

    pub fn journaled_boundary(&self) -> u64 {
        let state = self.state.lock();
        if self.mode.is_journaled() {
            state.journaled.boundary()
        } else {
            state.committed
        }
    }

    pub fn committed(&self) -> u64 {
        self.state.lock().committed
    }

    /// Block until the watermark reaches `seq`
    pub fn wait_for_durable(&self, seq: u64) {
        let mut state = self.state.lock();
        while self.watermark() < seq {
            self.cond.wait(&mut state);
        }
    }

    /// Like [`wait_for_durable`](Self::wait_for_durable) with a deadline.
    /// Returns true if the watermark reached `seq`.
    pub fn wait_for_durable_timeout(&self, seq: u64, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait_for_durable(seq);
            return true;
        };
        let mut state = self.state.lock();
        while self.watermark() < seq {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return self.watermark() >= seq;
            }
        }
        true
    }

    /// Block until every op through `seq` has applied
    pub fn wait_for_applied(&self, seq: u64) {
        let mut state = self.state.lock();
        while state.applied.boundary() < seq {
            self.cond.wait(&mut state);
        }
    }

    /// Block until every op through `seq` has its journal record acked.
    /// Returns at once without a journal.
    pub fn wait_for_journaled(&self, seq: u64) {
        if !self.mode.is_journaled() {
            return;
        }
        let mut state = self.state.lock();
        while state.journaled.boundary() < seq {
            self.cond.wait(&mut state);
        }
    }
}
