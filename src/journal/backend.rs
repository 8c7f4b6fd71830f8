//! Journal device interface

use super::errors::JournalResult;

/// Position handed back by `append`; acking it makes every record up
/// to and including it durable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppendToken {
    seq: u64,
}

impl AppendToken {
    pub fn new(seq: u64) -> Self {
        Self { seq }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// A record read back at replay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub seq: u64,
    pub payload: Vec<u8>,
}

/// Append-only journal device.
///
/// Appends arrive in increasing seq order from a single writer thread.
/// `trim` may be called concurrently from the sync thread.
pub trait JournalBackend: Send + Sync {
    /// Write a record; it is not durable until acked
    fn append(&self, seq: u64, payload: &[u8]) -> JournalResult<AppendToken>;

    /// Block until every record through `token` is durable
    fn ack(&self, token: AppendToken) -> JournalResult<()>;

    /// Release space held by records through `up_to_seq`
    fn trim(&self, up_to_seq: u64) -> JournalResult<()>;

    /// Durable, untrimmed records with seq greater than `after_seq`,
    /// in seq order
    fn replay(&self, after_seq: u64) -> JournalResult<Vec<JournalEntry>>;
}
