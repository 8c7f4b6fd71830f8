//! Crash recovery tests
//!
//! A crash is simulated by taking the crash images of the backend and
//! journal while the engine is running: the backend keeps only what was
//! committed, the journal only what was acked. Remounting those images
//! must expose exactly the ops that were durable at the crash.

mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use objstore::backend::MemStore;
use objstore::config::JournalMode;
use objstore::journal::{self, FileJournal, JournalErrorCode, MemJournal};

use common::{config, create, mount, mount_with, write};

const WAIT: Duration = Duration::from_secs(5);

fn crash_images(m: &common::Mounted) -> (Arc<MemStore>, Arc<MemJournal>) {
    let journal = m.journal.as_ref().unwrap();
    (
        Arc::new(m.backend.crash_image()),
        Arc::new(journal.crash_image()),
    )
}

// =============================================================================
// Only durable ops survive
// =============================================================================

/// Ten ops submitted, the journal acks only through the fifth: after
/// the crash exactly those five are visible and the next seq follows
/// them.
#[test]
fn test_only_journaled_ops_survive_crash() {
    let m = mount(config(JournalMode::WriteAhead));
    let journal = m.journal.clone().unwrap();
    let seqr = m.store.create_sequencer("crash");
    m.store.apply_transactions(&seqr, create("c")).unwrap();

    journal.set_durable_limit(Some(6));
    for i in 0..10 {
        m.store
            .submit_transactions(&seqr, write("c", &format!("o{}", i), 16), None, None)
            .unwrap();
    }
    assert!(journal.wait_durable_thru(6, WAIT));
    let (backend, journal_image) = crash_images(&m);

    // Let the original engine drain so it can shut down.
    journal.release();
    drop(m);

    let r = mount_with(
        config(JournalMode::WriteAhead),
        backend,
        Some(journal_image),
    );
    let stats = r.store.stats();
    assert_eq!(stats.mounted_seq, 6);
    assert_eq!(stats.metrics.ops_replayed, 6);

    let image = r.backend.stable_image();
    assert!(image.has_collection("c"));
    for i in 0..5 {
        assert!(image.has_object("c", &format!("o{}", i)), "o{} lost", i);
    }
    for i in 5..10 {
        assert!(!image.has_object("c", &format!("o{}", i)), "o{} resurrected", i);
    }

    let seq = r
        .store
        .apply_transactions(&r.store.default_sequencer(), write("c", "after", 4))
        .unwrap();
    assert_eq!(seq, 7);
}

/// In parallel mode an op can apply before its record is acked; a crash
/// in that window must not keep its effect.
#[test]
fn test_applied_but_unacked_op_is_lost() {
    let m = mount(config(JournalMode::Parallel));
    let journal = m.journal.clone().unwrap();
    let seqr = m.store.create_sequencer("p");
    m.store.apply_transactions(&seqr, create("c")).unwrap();
    m.store.sync().unwrap();

    journal.set_durable_limit(Some(1));
    let (tx, rx) = crossbeam_channel::bounded(1);
    m.store
        .submit_transactions(
            &seqr,
            write("c", "volatile", 8),
            Some(Box::new(move || {
                let _ = tx.send(());
            })),
            None,
        )
        .unwrap();
    rx.recv_timeout(WAIT).unwrap();
    assert!(m.backend.live_image().has_object("c", "volatile"));

    let (backend, journal_image) = crash_images(&m);
    journal.release();
    drop(m);

    let r = mount_with(config(JournalMode::Parallel), backend, Some(journal_image));
    assert_eq!(r.store.stats().mounted_seq, 1);
    assert!(r.backend.live_image().has_collection("c"));
    assert!(!r.backend.live_image().has_object("c", "volatile"));
}

/// Ops committed before the crash come back from the backend, ops after
/// the commit come back from the journal; neither is applied twice.
#[test]
fn test_replay_starts_after_committed_seq() {
    let m = mount(config(JournalMode::WriteAhead));
    let seqr = m.store.create_sequencer("mix");
    m.store.apply_transactions(&seqr, create("c")).unwrap();
    for i in 0..3 {
        m.store
            .apply_transactions(&seqr, write("c", &format!("early{}", i), 8))
            .unwrap();
    }
    assert_eq!(m.store.sync().unwrap(), 4);
    for i in 0..3 {
        m.store
            .apply_transactions(&seqr, write("c", &format!("late{}", i), 8))
            .unwrap();
    }

    let (backend, journal_image) = crash_images(&m);
    drop(m);

    let r = mount_with(config(JournalMode::WriteAhead), backend, Some(journal_image));
    let stats = r.store.stats();
    assert_eq!(stats.mounted_seq, 7);
    assert_eq!(stats.metrics.ops_replayed, 3);
    let replayed: Vec<u64> = r
        .backend
        .applied()
        .iter()
        .filter(|a| a.replay)
        .map(|a| a.seq)
        .collect();
    assert_eq!(replayed, vec![5, 6, 7]);

    let image = r.backend.stable_image();
    assert!(image.has_object("c", "early2"));
    assert!(image.has_object("c", "late2"));
    assert_eq!(r.journal.as_ref().unwrap().trimmed_thru(), 7);
}

// =============================================================================
// File journal
// =============================================================================

#[test]
fn test_file_journal_survives_remount() {
    let dir = tempfile::tempdir().unwrap();
    let live_path = dir.path().join("journal");
    let crash_path = dir.path().join("journal.crash");

    let mut cfg = config(JournalMode::WriteAhead);
    cfg.journal_path = Some(live_path.clone());
    cfg.fsid = Some(Uuid::new_v4());

    let backend = Arc::new(MemStore::new());
    let crashed_backend;
    {
        let journal_backend = journal::open_configured(&cfg).unwrap();
        let store = objstore::ObjectStore::mount(cfg.clone(), backend.clone(), journal_backend).unwrap();
        let seqr = store.create_sequencer("file");
        store.apply_transactions(&seqr, create("c")).unwrap();
        for i in 0..4 {
            store
                .apply_transactions(&seqr, write("c", &format!("o{}", i), 32))
                .unwrap();
        }
        // Every record above is acked, nothing is committed yet.
        crashed_backend = Arc::new(backend.crash_image());
        fs::copy(&live_path, &crash_path).unwrap();
        store.shutdown().unwrap();
    }

    let scan = FileJournal::scan(&crash_path).unwrap();
    assert_eq!(scan.live_records().count(), 5);
    assert_eq!(scan.torn_bytes, 0);

    let mut crash_cfg = cfg.clone();
    crash_cfg.journal_path = Some(crash_path.clone());
    let journal_backend = journal::open_configured(&crash_cfg).unwrap();
    let store = objstore::ObjectStore::mount(crash_cfg, crashed_backend.clone(), journal_backend).unwrap();
    assert_eq!(store.stats().mounted_seq, 5);
    assert!(crashed_backend.stable_image().has_object("c", "o3"));
    store.shutdown().unwrap();

    let after = FileJournal::scan(&crash_path).unwrap();
    assert_eq!(after.live_records().count(), 0);
}

#[test]
fn test_file_journal_rejects_foreign_fsid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("journal");
    FileJournal::create(&path, Uuid::new_v4()).unwrap();

    let mut cfg = config(JournalMode::WriteAhead);
    cfg.journal_path = Some(path);
    cfg.fsid = Some(Uuid::new_v4());
    let err = journal::open_configured(&cfg).err().unwrap();
    assert_eq!(err.code(), JournalErrorCode::ObjJournalFsidMismatch);
}
