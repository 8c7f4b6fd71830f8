//! Point-in-time engine status

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::JournalMode;
use crate::observability::MetricsSnapshot;

/// Watermarks, throttle occupancy and counters of a mounted store
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub journal_mode: JournalMode,
    /// Seq every op at or below which was durable at mount
    pub mounted_seq: u64,
    /// Last seq handed out
    pub last_seq: u64,
    /// Contiguous applied boundary
    pub applied_seq: u64,
    /// Contiguous journaled boundary (committed seq without a journal)
    pub journaled_seq: u64,
    pub committed_seq: u64,
    /// Durability watermark
    pub durable_seq: u64,
    pub outstanding_ops: u64,
    pub outstanding_bytes: u64,
    /// Throttle maxima in force, 0 = unlimited
    pub max_ops: u64,
    pub max_bytes: u64,
    pub committing: bool,
    pub sequencers: usize,
    pub last_commit_at: Option<DateTime<Utc>>,
    pub metrics: MetricsSnapshot,
}

impl StoreStats {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
