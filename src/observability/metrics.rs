//! Metrics registry
//!
//! - Counters only, monotonic, reset on process start
//! - Relaxed atomics; a snapshot is not a consistent cut across counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for one store instance
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    ops_submitted: AtomicU64,
    bytes_submitted: AtomicU64,
    ops_applied: AtomicU64,
    ops_journaled: AtomicU64,
    ops_replayed: AtomicU64,
    journal_records: AtomicU64,
    journal_bytes: AtomicU64,
    journal_batches: AtomicU64,
    journal_trims: AtomicU64,
    sync_commits: AtomicU64,
    sync_failures: AtomicU64,
    throttle_waits: AtomicU64,
    flusher_queued: AtomicU64,
    flusher_dropped: AtomicU64,
    flusher_written: AtomicU64,
    flusher_failed: AtomicU64,
    heartbeat_warnings: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        #[doc = concat!("Increment `", stringify!($field), "`")]
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl MetricsRegistry {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted submission of `bytes` payload bytes
    pub fn record_submit(&self, bytes: u64) {
        self.ops_submitted.fetch_add(1, Ordering::Relaxed);
        self.bytes_submitted.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record one journal batch of `records` records totalling `bytes`
    pub fn record_journal_batch(&self, records: u64, bytes: u64) {
        self.journal_batches.fetch_add(1, Ordering::Relaxed);
        self.journal_records.fetch_add(records, Ordering::Relaxed);
        self.journal_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.ops_journaled.fetch_add(records, Ordering::Relaxed);
    }

    counter!(increment_applied, ops_applied);
    counter!(increment_replayed, ops_replayed);
    counter!(increment_journal_trims, journal_trims);
    counter!(increment_sync_commits, sync_commits);
    counter!(increment_sync_failures, sync_failures);
    counter!(increment_throttle_waits, throttle_waits);
    counter!(increment_flusher_queued, flusher_queued);
    counter!(increment_flusher_dropped, flusher_dropped);
    counter!(increment_flusher_written, flusher_written);
    counter!(increment_flusher_failed, flusher_failed);
    counter!(increment_heartbeat_warnings, heartbeat_warnings);

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            ops_submitted: load(&self.ops_submitted),
            bytes_submitted: load(&self.bytes_submitted),
            ops_applied: load(&self.ops_applied),
            ops_journaled: load(&self.ops_journaled),
            ops_replayed: load(&self.ops_replayed),
            journal_records: load(&self.journal_records),
            journal_bytes: load(&self.journal_bytes),
            journal_batches: load(&self.journal_batches),
            journal_trims: load(&self.journal_trims),
            sync_commits: load(&self.sync_commits),
            sync_failures: load(&self.sync_failures),
            throttle_waits: load(&self.throttle_waits),
            flusher_queued: load(&self.flusher_queued),
            flusher_dropped: load(&self.flusher_dropped),
            flusher_written: load(&self.flusher_written),
            flusher_failed: load(&self.flusher_failed),
            heartbeat_warnings: load(&self.heartbeat_warnings),
        }
    }

    /// Snapshot rendered as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ops_submitted: u64,
    pub bytes_submitted: u64,
    pub ops_applied: u64,
    pub ops_journaled: u64,
    pub ops_replayed: u64,
    pub journal_records: u64,
    pub journal_bytes: u64,
    pub journal_batches: u64,
    pub journal_trims: u64,
    pub sync_commits: u64,
    pub sync_failures: u64,
    pub throttle_waits: u64,
    pub flusher_queued: u64,
    pub flusher_dropped: u64,
    pub flusher_written: u64,
    pub flusher_failed: u64,
    pub heartbeat_warnings: u64,
}
