//! Storage collaborators consumed by the engine
//!
//! The engine never interprets mutations itself. It hands each
//! transaction of an op to an [`ObjectBackend`] under the op's
//! sequencer apply lock, and asks a [`CommitBackend`] to persist
//! everything applied through a sequence number.
//!
//! Implementations must apply the mutations of one transaction in
//! list order and must tolerate concurrent `apply` calls for
//! different sequencers.

mod errors;
mod memory;
mod transaction;

pub use errors::{StorageError, StorageResult};
pub use memory::{AppliedRecord, MemStore, StoreImage};
pub use transaction::{decode_transactions, encode_transactions, Mutation, Transaction};

use std::fs::File;
use std::sync::Arc;

use crate::flusher::FlushQueue;

static DETACHED_FLUSHER: FlushQueue = FlushQueue::disabled();

/// Per-apply context handed to the backend
#[derive(Clone, Copy)]
pub struct ApplyContext<'a> {
    seq: u64,
    sequencer: &'a str,
    replay: bool,
    flusher: &'a FlushQueue,
}

impl<'a> ApplyContext<'a> {
    pub fn new(seq: u64, sequencer: &'a str, replay: bool, flusher: &'a FlushQueue) -> Self {
        Self {
            seq,
            sequencer,
            replay,
            flusher,
        }
    }

    /// Context with no write-back path, for direct backend use
    pub fn detached(seq: u64, sequencer: &'a str) -> Self {
        Self::new(seq, sequencer, false, &DETACHED_FLUSHER)
    }

    /// Sequence number of the op being applied
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Name of the sequencer the op was submitted on
    pub fn sequencer(&self) -> &'a str {
        self.sequencer
    }

    /// True while the store is replaying its journal at mount.
    ///
    /// Replayed ops may find their effects partly present already;
    /// backends should treat not-found and already-exists as success.
    pub fn is_replay(&self) -> bool {
        self.replay
    }

    /// Ask the flusher to start write-back of a freshly written range.
    ///
    /// Best effort: returns false when the hint was dropped.
    pub fn queue_writeback(&self, file: &Arc<File>, offset: u64, len: u64) -> bool {
        self.flusher.queue(file, offset, len)
    }
}

/// Applies transactions to live (readable) state
pub trait ObjectBackend: Send + Sync {
    fn apply(&self, tx: &Transaction, ctx: &ApplyContext<'_>) -> StorageResult<()>;
}

/// Persists applied state to stable media
pub trait CommitBackend: Send + Sync {
    /// Make every op applied through `op_seq` crash-safe and record
    /// `op_seq` as the committed sequence
    fn commit_to_stable_media(&self, op_seq: u64) -> StorageResult<()>;

    /// Sequence recorded by the last successful commit (0 if never)
    fn committed_seq(&self) -> StorageResult<u64>;
}

/// A complete storage backend
pub trait Backend: ObjectBackend + CommitBackend {}

impl<T: ObjectBackend + CommitBackend> Backend for T {}
