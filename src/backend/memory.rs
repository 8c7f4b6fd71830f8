//! In-memory storage backend
//!
//! Keeps two images: `live`, which every apply mutates immediately,
//! and `stable`, which only advances on commit. Committing through
//! `op_seq` folds the applied transactions with seq <= op_seq into the
//! stable image in seq order, so the stable image is exactly the state
//! at the committed sequence. `crash_image()` models a power loss.
//!
//! It also records apply order and detects overlapping applies on the
//! same sequencer, which the ordering tests rely on.

use std::collections::{BTreeMap, HashMap};
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::errors::{StorageError, StorageResult};
use super::transaction::{Mutation, Transaction};
use super::{ApplyContext, CommitBackend, ObjectBackend};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Object {
    data: Vec<u8>,
    attrs: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Collection {
    attrs: BTreeMap<String, Vec<u8>>,
    objects: BTreeMap<String, Object>,
}

/// A full copy of the collection/object hierarchy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreImage {
    collections: BTreeMap<String, Collection>,
}

impl StoreImage {
    /// Apply every mutation of `tx` in order.
    ///
    /// With `tolerate_missing`, not-found and already-exists failures
    /// are skipped instead of aborting the transaction.
    pub fn apply(&mut self, tx: &Transaction, tolerate_missing: bool) -> StorageResult<()> {
        for mutation in tx.mutations() {
            match self.apply_mutation(mutation) {
                Err(e) if tolerate_missing && e.is_replay_tolerable() => continue,
                other => other?,
            }
        }
        Ok(())
    }

    fn collection_mut(&mut self, cid: &str) -> StorageResult<&mut Collection> {
        self.collections
            .get_mut(cid)
            .ok_or_else(|| StorageError::CollectionNotFound(cid.to_string()))
    }

    fn object_mut(&mut self, cid: &str, oid: &str) -> StorageResult<&mut Object> {
        self.collection_mut(cid)?
            .objects
            .get_mut(oid)
            .ok_or_else(|| StorageError::ObjectNotFound {
                collection: cid.to_string(),
                object: oid.to_string(),
            })
    }

    fn get_or_create(&mut self, cid: &str, oid: &str) -> StorageResult<&mut Object> {
        Ok(self
            .collection_mut(cid)?
            .objects
            .entry(oid.to_string())
            .or_default())
    }

    fn apply_mutation(&mut self, mutation: &Mutation) -> StorageResult<()> {
        match mutation {
            Mutation::CreateCollection { cid } => {
                if self.collections.contains_key(cid) {
                    return Err(StorageError::AlreadyExists(cid.clone()));
                }
                self.collections.insert(cid.clone(), Collection::default());
            }
            Mutation::RemoveCollection { cid } => {
                if self.collections.remove(cid).is_none() {
                    return Err(StorageError::CollectionNotFound(cid.clone()));
                }
            }
            Mutation::CollectionSetAttr { cid, name, value } => {
                self.collection_mut(cid)?
                    .attrs
                    .insert(name.clone(), value.clone());
            }
            Mutation::Touch { cid, oid } => {
                self.get_or_create(cid, oid)?;
            }
            Mutation::Write {
                cid,
                oid,
                offset,
                data,
            } => {
                let object = self.get_or_create(cid, oid)?;
                let start = *offset as usize;
                let end = start + data.len();
                if object.data.len() < end {
                    object.data.resize(end, 0);
                }
                object.data[start..end].copy_from_slice(data);
            }
            Mutation::Zero {
                cid,
                oid,
                offset,
                len,
            } => {
                let object = self.get_or_create(cid, oid)?;
                let start = *offset as usize;
                let end = start + *len as usize;
                if object.data.len() < end {
                    object.data.resize(end, 0);
                }
                object.data[start..end].fill(0);
            }
            Mutation::Truncate { cid, oid, size } => {
                self.object_mut(cid, oid)?.data.resize(*size as usize, 0);
            }
            Mutation::Remove { cid, oid } => {
                if self.collection_mut(cid)?.objects.remove(oid).is_none() {
                    return Err(StorageError::ObjectNotFound {
                        collection: cid.clone(),
                        object: oid.clone(),
                    });
                }
            }
            Mutation::Clone { cid, oid, dst } => {
                let copy = self.object_mut(cid, oid)?.clone();
                self.collection_mut(cid)?.objects.insert(dst.clone(), copy);
            }
            Mutation::SetAttr {
                cid,
                oid,
                name,
                value,
            } => {
                self.object_mut(cid, oid)?
                    .attrs
                    .insert(name.clone(), value.clone());
            }
            Mutation::RmAttr { cid, oid, name } => {
                if self.object_mut(cid, oid)?.attrs.remove(name).is_none() {
                    return Err(StorageError::AttrNotFound(name.clone()));
                }
            }
            Mutation::CollectionAdd { cid, src_cid, oid } => {
                let copy = self.object_mut(src_cid, oid)?.clone();
                let dest = self.collection_mut(cid)?;
                if dest.objects.contains_key(oid) {
                    return Err(StorageError::AlreadyExists(format!("{}/{}", cid, oid)));
                }
                dest.objects.insert(oid.clone(), copy);
            }
        }
        Ok(())
    }

    pub fn has_collection(&self, cid: &str) -> bool {
        self.collections.contains_key(cid)
    }

    pub fn has_object(&self, cid: &str, oid: &str) -> bool {
        self.collections
            .get(cid)
            .map(|c| c.objects.contains_key(oid))
            .unwrap_or(false)
    }

    pub fn object_data(&self, cid: &str, oid: &str) -> Option<&[u8]> {
        self.collections
            .get(cid)?
            .objects
            .get(oid)
            .map(|o| o.data.as_slice())
    }

    pub fn object_attr(&self, cid: &str, oid: &str, name: &str) -> Option<&[u8]> {
        self.collections
            .get(cid)?
            .objects
            .get(oid)?
            .attrs
            .get(name)
            .map(Vec::as_slice)
    }

    pub fn collection_attr(&self, cid: &str, name: &str) -> Option<&[u8]> {
        self.collections
            .get(cid)?
            .attrs
            .get(name)
            .map(Vec::as_slice)
    }

    /// Objects in a collection, sorted by name
    pub fn list_objects(&self, cid: &str) -> Vec<String> {
        self.collections
            .get(cid)
            .map(|c| c.objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn object_count(&self) -> usize {
        self.collections.values().map(|c| c.objects.len()).sum()
    }
}

/// One recorded `apply` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRecord {
    pub seq: u64,
    pub sequencer: String,
    pub replay: bool,
}

#[derive(Debug, Default)]
struct StableState {
    image: StoreImage,
    committed_seq: u64,
    /// Applied but not yet committed, keyed by op seq
    uncommitted: BTreeMap<u64, Vec<Transaction>>,
}

/// In-memory [`Backend`](super::Backend)
#[derive(Debug, Default)]
pub struct MemStore {
    live: Mutex<StoreImage>,
    stable: Mutex<StableState>,
    applied: Mutex<Vec<AppliedRecord>>,
    in_apply: Mutex<HashMap<String, usize>>,
    overlaps: AtomicU64,
    active: AtomicUsize,
    max_active: AtomicUsize,
    apply_delay: Mutex<Duration>,
    fail_apply_seq: Mutex<Option<u64>>,
    fail_commits: AtomicBool,
    commits: AtomicU64,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// What survives a power loss: the stable image at the committed seq
    pub fn crash_image(&self) -> MemStore {
        let stable = self.stable.lock();
        MemStore {
            live: Mutex::new(stable.image.clone()),
            stable: Mutex::new(StableState {
                image: stable.image.clone(),
                committed_seq: stable.committed_seq,
                uncommitted: BTreeMap::new(),
            }),
            ..MemStore::default()
        }
    }

    /// Copy of the live (readable) image
    pub fn live_image(&self) -> StoreImage {
        self.live.lock().clone()
    }

    /// Copy of the stable image
    pub fn stable_image(&self) -> StoreImage {
        self.stable.lock().image.clone()
    }

    /// Every apply call so far, in the order they ran
    pub fn applied(&self) -> Vec<AppliedRecord> {
        self.applied.lock().clone()
    }

    /// Seqs applied on `sequencer`, in apply order, one entry per op
    pub fn applied_seqs(&self, sequencer: &str) -> Vec<u64> {
        let mut seqs: Vec<u64> = Vec::new();
        for record in self.applied.lock().iter() {
            if record.sequencer == sequencer && seqs.last() != Some(&record.seq) {
                seqs.push(record.seq);
            }
        }
        seqs
    }

    /// Times an apply started while another apply on the same
    /// sequencer was still running
    pub fn overlaps(&self) -> u64 {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Highest number of applies observed running at once
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Sleep inside every apply, to widen race windows in tests
    pub fn set_apply_delay(&self, delay: Duration) {
        *self.apply_delay.lock() = delay;
    }

    /// Fail the apply of the op with this seq
    pub fn fail_apply_at(&self, seq: u64) {
        *self.fail_apply_seq.lock() = Some(seq);
    }

    /// Fail every commit until cleared
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn enter(&self, sequencer: &str) {
        {
            let mut in_apply = self.in_apply.lock();
            let count = in_apply.entry(sequencer.to_string()).or_insert(0);
            *count += 1;
            if *count > 1 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self, sequencer: &str) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        let mut in_apply = self.in_apply.lock();
        if let Some(count) = in_apply.get_mut(sequencer) {
            *count -= 1;
        }
    }

    fn apply_inner(&self, tx: &Transaction, ctx: &ApplyContext<'_>) -> StorageResult<()> {
        let delay = *self.apply_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if *self.fail_apply_seq.lock() == Some(ctx.seq()) {
            return Err(StorageError::Injected(format!("apply of seq {}", ctx.seq())));
        }

        self.live.lock().apply(tx, ctx.is_replay())?;
        self.stable
            .lock()
            .uncommitted
            .entry(ctx.seq())
            .or_default()
            .push(tx.clone());
        self.applied.lock().push(AppliedRecord {
            seq: ctx.seq(),
            sequencer: ctx.sequencer().to_string(),
            replay: ctx.is_replay(),
        });
        Ok(())
    }
}

impl ObjectBackend for MemStore {
    fn apply(&self, tx: &Transaction, ctx: &ApplyContext<'_>) -> StorageResult<()> {
        self.enter(ctx.sequencer());
        let result = self.apply_inner(tx, ctx);
        self.exit(ctx.sequencer());
        result
    }
}

impl CommitBackend for MemStore {
    fn commit_to_stable_media(&self, op_seq: u64) -> StorageResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::Injected(format!("commit through seq {}", op_seq)));
        }

        let mut stable = self.stable.lock();
        let rest = stable.uncommitted.split_off(&(op_seq + 1));
        let ready = mem::replace(&mut stable.uncommitted, rest);
        for transactions in ready.values() {
            for tx in transactions {
                // Cross-stream fold order may differ from live apply order.
                stable.image.apply(tx, true)?;
            }
        }
        stable.committed_seq = stable.committed_seq.max(op_seq);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn committed_seq(&self) -> StorageResult<u64> {
        Ok(self.stable.lock().committed_seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flusher::FlushQueue;

    fn tx(build: impl FnOnce(&mut Transaction)) -> Transaction {
        let mut tx = Transaction::new();
        build(&mut tx);
        tx
    }

    fn apply(store: &MemStore, seq: u64, t: &Transaction) -> StorageResult<()> {
        store.apply(t, &ApplyContext::detached(seq, "s"))
    }

    #[test]
    fn test_write_extends_and_overwrites() {
        let store = MemStore::new();
        apply(&store, 1, &tx(|t| {
            t.create_collection("c").write("c", "o", 4, b"abcd".to_vec());
        }))
        .unwrap();
        apply(&store, 2, &tx(|t| {
            t.write("c", "o", 0, b"xy".to_vec()).zero("c", "o", 5, 1);
        }))
        .unwrap();

        let live = store.live_image();
        assert_eq!(live.object_data("c", "o").unwrap(), b"xy\0\0a\0cd");
    }

    #[test]
    fn test_missing_collection_fails() {
        let store = MemStore::new();
        let err = apply(&store, 1, &tx(|t| {
            t.touch("nope", "o");
        }))
        .unwrap_err();
        assert_eq!(err.code(), "OBJ_STORAGE_NOT_FOUND");
    }

    #[test]
    fn test_replay_tolerates_existing() {
        let store = MemStore::new();
        let create = tx(|t| {
            t.create_collection("c");
        });
        apply(&store, 1, &create).unwrap();
        assert!(apply(&store, 2, &create).is_err());
        store
            .apply(&create, &ApplyContext::new(3, "s", true, &FlushQueue::disabled()))
            .unwrap();
    }

    #[test]
    fn test_clone_attrs_and_collection_add() {
        let store = MemStore::new();
        apply(&store, 1, &tx(|t| {
            t.create_collection("a")
                .create_collection("b")
                .write("a", "o", 0, b"data".to_vec())
                .setattr("a", "o", "k", b"v".to_vec())
                .clone_object("a", "o", "o2")
                .collection_add("b", "a", "o")
                .rmattr("a", "o", "k")
                .collection_setattr("b", "ver", b"1".to_vec());
        }))
        .unwrap();

        let live = store.live_image();
        assert_eq!(live.object_attr("a", "o2", "k").unwrap(), b"v");
        assert!(live.object_attr("a", "o", "k").is_none());
        assert_eq!(live.object_data("b", "o").unwrap(), b"data");
        assert_eq!(live.collection_attr("b", "ver").unwrap(), b"1");
        assert_eq!(live.list_objects("a"), vec!["o".to_string(), "o2".to_string()]);
    }

    #[test]
    fn test_remove_collection_drops_its_objects() {
        let store = MemStore::new();
        apply(&store, 1, &tx(|t| {
            t.create_collection("a")
                .create_collection("b")
                .touch("a", "x")
                .touch("a", "y")
                .touch("b", "z");
        }))
        .unwrap();
        assert_eq!(store.live_image().object_count(), 3);

        apply(&store, 2, &tx(|t| {
            t.remove_collection("a");
        }))
        .unwrap();
        let live = store.live_image();
        assert!(!live.has_collection("a"));
        assert_eq!(live.object_count(), 1);

        let err = apply(&store, 3, &tx(|t| {
            t.remove_collection("a");
        }))
        .unwrap_err();
        assert_eq!(err.code(), "OBJ_STORAGE_NOT_FOUND");
    }

    #[test]
    fn test_commit_folds_only_through_op_seq() {
        let store = MemStore::new();
        apply(&store, 1, &tx(|t| {
            t.create_collection("c");
        }))
        .unwrap();
        apply(&store, 2, &tx(|t| {
            t.touch("c", "one");
        }))
        .unwrap();
        apply(&store, 3, &tx(|t| {
            t.touch("c", "two");
        }))
        .unwrap();

        store.commit_to_stable_media(2).unwrap();
        assert_eq!(store.committed_seq().unwrap(), 2);

        let crashed = store.crash_image();
        let image = crashed.live_image();
        assert!(image.has_object("c", "one"));
        assert!(!image.has_object("c", "two"));
        assert_eq!(crashed.committed_seq().unwrap(), 2);

        store.commit_to_stable_media(3).unwrap();
        assert!(store.stable_image().has_object("c", "two"));
        assert_eq!(store.commit_count(), 2);
    }

    #[test]
    fn test_injected_failures() {
        let store = MemStore::new();
        store.fail_apply_at(7);
        let create = tx(|t| {
            t.create_collection("c");
        });
        assert_eq!(apply(&store, 7, &create).unwrap_err().code(), "OBJ_STORAGE_INJECTED");

        store.set_fail_commits(true);
        assert!(store.commit_to_stable_media(1).is_err());
        assert_eq!(store.committed_seq().unwrap(), 0);
    }

    #[test]
    fn test_applied_seqs_dedups_multi_transaction_ops() {
        let store = MemStore::new();
        let create = tx(|t| {
            t.create_collection("c");
        });
        let touch = tx(|t| {
            t.touch("c", "o");
        });
        apply(&store, 1, &create).unwrap();
        apply(&store, 1, &touch).unwrap();
        apply(&store, 2, &touch).unwrap();
        assert_eq!(store.applied_seqs("s"), vec![1, 2]);
        assert_eq!(store.overlaps(), 0);
    }
}
