//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use objstore::backend::{MemStore, Transaction};
use objstore::config::{JournalMode, StoreConfig};
use objstore::journal::{JournalBackend, MemJournal};
use objstore::store::ObjectStore;

/// Config with background syncs effectively off and quiet logs
pub fn config(mode: JournalMode) -> StoreConfig {
    StoreConfig {
        journal_mode: mode,
        max_sync_interval_secs: 3600.0,
        flusher: false,
        log_level: "error".to_string(),
        ..StoreConfig::default()
    }
}

pub struct Mounted {
    pub store: ObjectStore,
    pub backend: Arc<MemStore>,
    pub journal: Option<Arc<MemJournal>>,
}

pub fn mount_with(config: StoreConfig, backend: Arc<MemStore>, journal: Option<Arc<MemJournal>>) -> Mounted {
    let dyn_journal = journal
        .clone()
        .map(|j| -> Arc<dyn JournalBackend> { j });
    let store = ObjectStore::mount(config, backend.clone(), dyn_journal).unwrap();
    Mounted {
        store,
        backend,
        journal,
    }
}

pub fn mount(config: StoreConfig) -> Mounted {
    let journal = config
        .journal_mode
        .is_journaled()
        .then(|| Arc::new(MemJournal::new()));
    mount_with(config, Arc::new(MemStore::new()), journal)
}

/// One transaction writing `len` bytes to `cid/oid`
pub fn write(cid: &str, oid: &str, len: usize) -> Vec<Transaction> {
    let mut tx = Transaction::new();
    tx.write(cid, oid, 0, vec![0x5a; len]);
    vec![tx]
}

pub fn create(cid: &str) -> Vec<Transaction> {
    let mut tx = Transaction::new();
    tx.create_collection(cid);
    vec![tx]
}
