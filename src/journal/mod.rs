//! Journal subsystem for objstore
//!
//! The journal makes an op durable before (write-ahead) or alongside
//! (parallel) its application to the backing store. Records are
//! appended by a single writer thread, acked in batches, and trimmed
//! once a sync commit has made the store itself durable past them.
//!
//! # Invariants
//!
//! - A durability completion never runs before its record is acked
//! - Completions run in seq order
//! - Replay yields only acked, untrimmed records, in seq order
//! - A complete record with a bad checksum halts the mount

mod backend;
mod checksum;
mod coordinator;
mod errors;
mod file;
mod memory;
mod record;

pub use backend::{AppendToken, JournalBackend, JournalEntry};
pub use checksum::compute_checksum;
pub use coordinator::{BatchLimits, JournalCompletion, JournalCoordinator, JournalFatalHook};
pub use errors::{JournalError, JournalErrorCode, JournalResult};
pub use file::{FileJournal, JournalScan};
pub use memory::MemJournal;
pub use record::{JournalHeader, JournalRecord, HEADER_LEN, MAGIC, VERSION};

use std::sync::Arc;

use crate::config::StoreConfig;

/// The journal device a config describes: a `FileJournal` at
/// `journal_path`, otherwise an in-memory journal.
///
/// Returns `None` when the mode does not journal.
pub fn open_configured(config: &StoreConfig) -> JournalResult<Option<Arc<dyn JournalBackend>>> {
    if !config.journal_mode.is_journaled() {
        return Ok(None);
    }
    let journal: Arc<dyn JournalBackend> = match &config.journal_path {
        Some(path) => Arc::new(FileJournal::open_or_create(path, config.fsid)?),
        None => Arc::new(MemJournal::new()),
    };
    Ok(Some(journal))
}
