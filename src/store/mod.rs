//! The object store engine
//!
//! `ObjectStore` is the one engine context: it owns the throttle, the
//! seq allocator, the sequencers, the worker pool, the journal writer,
//! the sync thread, the finishers and the flusher. Callers share it by
//! reference and never see the pieces.
//!
//! # Op path
//!
//! ```text
//! submit ─ reserve throttle ─ allocate seq ─┬─ writeahead: journal ─ ack ─ queue ─ apply
//!                                           ├─ parallel:   journal ─ ack
//!                                           │              queue ─ apply
//!                                           └─ none:       queue ─ apply ... sync commit
//! ```
//!
//! An op's `on_applied` fires once it has applied; `on_durable` once it
//! has applied and its journal record is acked (or, with no journal,
//! once a sync commit covers it). Both fire in seq order.
//!
//! # Failure policy
//!
//! Apply failure, journal write failure and thread stalls go through
//! [`fatal`]: the process aborts and recovery happens by replay at the
//! next mount. Commit failures are reported to `sync` callers and leave
//! every watermark where it was.

mod engine;
mod errors;
mod mount;
mod stats;

pub use errors::{StoreError, StoreResult};
pub use mount::{replay_journal, ReplayOutcome, REPLAY_SEQUENCER};
pub use stats::StoreStats;

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use self::engine::StoreCore;
use crate::backend::{encode_transactions, Backend, Transaction};
use crate::commit::{SyncCallback, SyncContext, SyncCoordinator, SyncSettings};
use crate::config::{JournalMode, StoreConfig};
use crate::dispatch::{
    DispatchQueue, HeartbeatMap, PoolSignal, TurnTimeouts, Watchdog, WorkerPool,
};
use crate::durability::{ApplyGate, DurabilityTracker};
use crate::finisher::{Completion, Finisher};
use crate::flusher::{FlushQueue, Flusher, SyncDataWriteBack};
use crate::journal::{BatchLimits, JournalBackend, JournalCoordinator, JournalError};
use crate::observability::{Event, Field, Logger, MetricsRegistry};
use crate::sequencer::{Op, OpSequencer, Sequencer};
use crate::throttle::{Throttle, ThrottleLimits};

const DEFAULT_SEQUENCER: &str = "default";

/// Log a FATAL event and abort the process
pub fn fatal(event: Event, fields: &[Field<'_>]) -> ! {
    Logger::fatal(event, fields);
    std::process::abort();
}

struct SubmitState {
    last_seq: u64,
    accepting: bool,
}

pub struct ObjectStore {
    config: StoreConfig,
    mounted_seq: u64,
    core: Arc<StoreCore>,
    submit: Mutex<SubmitState>,
    journal: Option<Arc<JournalCoordinator>>,
    sync: SyncCoordinator,
    workers: Mutex<Option<WorkerPool>>,
    flusher: Mutex<Option<Flusher>>,
    watchdog: Mutex<Option<Watchdog>>,
    default_sequencer: Sequencer,
    sequencers: Mutex<Vec<Weak<OpSequencer>>>,
}

impl ObjectStore {
    /// Replay the journal into `backend` and start the engine.
    ///
    /// `journal` must be given exactly when the configured mode journals.
    pub fn mount(
        config: StoreConfig,
        backend: Arc<dyn Backend>,
        journal: Option<Arc<dyn JournalBackend>>,
    ) -> StoreResult<Self> {
        config.validate()?;
        Logger::set_min_severity(config.log_severity()?);
        let mode = config.journal_mode;
        Logger::info(Event::StoreMount, &[("journal_mode", &mode)]);

        match (mode.is_journaled(), journal.is_some()) {
            (true, false) => {
                return Err(StoreError::config(format!(
                    "journal_mode '{}' needs a journal",
                    mode
                )))
            }
            (false, true) => {
                return Err(StoreError::config("journal_mode 'none' takes no journal"))
            }
            _ => {}
        }

        let metrics = Arc::new(MetricsRegistry::new());
        let replay = replay_journal(backend.as_ref(), journal.as_ref(), &metrics)?;
        let mounted_seq = replay.mounted_seq;

        let heartbeats = Arc::new(HeartbeatMap::new(Arc::clone(&metrics)));
        let watchdog = Watchdog::start(
            Arc::clone(&heartbeats),
            config.heartbeat_interval(),
            Box::new(|thread: &str, elapsed: Duration| {
                let elapsed_ms = elapsed.as_millis();
                fatal(
                    Event::SuicideTimeout,
                    &[("thread", &thread), ("elapsed_ms", &elapsed_ms)],
                )
            }),
        )?;

        let flusher = if config.flusher {
            Some(Flusher::start(
                config.flusher_max_fds,
                Arc::new(SyncDataWriteBack),
                Arc::clone(&metrics),
            )?)
        } else {
            None
        };
        let flush_queue = flusher
            .as_ref()
            .map(|f| f.queue().clone())
            .unwrap_or_else(FlushQueue::disabled);

        let journal = match journal {
            Some(backend) => Some(Arc::new(JournalCoordinator::start(
                backend,
                mounted_seq,
                BatchLimits::from_config(&config),
                Arc::clone(&metrics),
                Arc::new(|e: &JournalError| {
                    let code = e.code();
                    fatal(Event::JournalFailed, &[("error", e), ("code", &code)])
                }),
            )?)),
            None => None,
        };

        let throttle = Arc::new(Throttle::new(ThrottleLimits::from_config(&config)));
        let tracker = Arc::new(DurabilityTracker::new(mode, mounted_seq));
        let gate = Arc::new(ApplyGate::new(mounted_seq));
        let durable = Arc::new(Finisher::start("finisher-durable", mounted_seq + 1)?);

        let sync = SyncCoordinator::start(
            SyncContext {
                backend: Arc::clone(&backend),
                tracker: Arc::clone(&tracker),
                gate: Arc::clone(&gate),
                throttle: Arc::clone(&throttle),
                journal: journal.clone(),
                durable: Arc::clone(&durable),
                metrics: Arc::clone(&metrics),
            },
            SyncSettings {
                max_interval: config.max_sync_interval(),
                min_interval: config.min_sync_interval(),
                commit_timeout: config.commit_timeout(),
            },
            &heartbeats,
        )?;

        let signal = Arc::new(PoolSignal::new());
        let core = Arc::new(StoreCore {
            mode,
            backend,
            throttle,
            tracker,
            gate,
            applied: Finisher::start("finisher-applied", mounted_seq + 1)?,
            durable,
            ready: DispatchQueue::new(Arc::clone(&signal)),
            flush_queue,
            sync_trigger: (!mode.is_journaled()).then(|| sync.trigger()),
            metrics,
        });

        let workers = WorkerPool::start(
            "op-worker",
            config.op_threads,
            Arc::clone(&core),
            signal,
            &heartbeats,
            TurnTimeouts::new(config.op_thread_timeout(), config.op_thread_suicide_timeout()),
        )?;

        Logger::info(
            Event::StoreMounted,
            &[
                ("mounted_seq", &mounted_seq),
                ("replayed", &replay.replayed),
                ("op_threads", &config.op_threads),
            ],
        );

        Ok(Self {
            config,
            mounted_seq,
            core,
            submit: Mutex::new(SubmitState {
                last_seq: mounted_seq,
                accepting: true,
            }),
            journal,
            sync,
            workers: Mutex::new(Some(workers)),
            flusher: Mutex::new(flusher),
            watchdog: Mutex::new(Some(watchdog)),
            default_sequencer: Sequencer::new(DEFAULT_SEQUENCER),
            sequencers: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn journal_mode(&self) -> JournalMode {
        self.core.mode
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.core.metrics
    }

    /// Open a new ordering domain
    pub fn create_sequencer(&self, name: impl Into<String>) -> Sequencer {
        let sequencer = Sequencer::new(name);
        let mut sequencers = self.sequencers.lock();
        sequencers.retain(|s| s.strong_count() > 0);
        sequencers.push(Arc::downgrade(sequencer.op_sequencer()));
        sequencer
    }

    /// Sequencer shared by callers that do not need their own stream
    pub fn default_sequencer(&self) -> Sequencer {
        self.default_sequencer.clone()
    }

    /// Submit an op on `sequencer` and return its seq.
    ///
    /// Blocks only while the throttle is full.
    pub fn submit_transactions(
        &self,
        sequencer: &Sequencer,
        transactions: Vec<Transaction>,
        on_applied: Option<Completion>,
        on_durable: Option<Completion>,
    ) -> StoreResult<u64> {
        if !self.submit.lock().accepting {
            return Err(StoreError::ShuttingDown);
        }
        let mode = self.core.mode;
        let payload = if mode.is_journaled() {
            Some(encode_transactions(&transactions).map_err(StoreError::Encode)?)
        } else {
            None
        };

        let cost = Op::cost_of(&transactions);
        if self.core.throttle.reserve(cost) {
            self.core.metrics.increment_throttle_waits();
            Logger::trace(
                Event::ThrottleWait,
                &[("ops", &cost.ops), ("bytes", &cost.bytes)],
            );
        }

        let mut submit = self.submit.lock();
        if !submit.accepting {
            drop(submit);
            self.core.throttle.release(cost);
            return Err(StoreError::ShuttingDown);
        }
        submit.last_seq += 1;
        let seq = submit.last_seq;
        self.core.tracker.register(seq);

        let op = Arc::new(Op::new(
            seq,
            transactions,
            on_applied,
            on_durable,
            mode.is_journaled(),
        ));
        let op_sequencer = sequencer.op_sequencer();
        match (&self.journal, payload) {
            (Some(journal), Some(payload)) => {
                op_sequencer.queue_journal(seq);
                let core = Arc::clone(&self.core);
                let journaled_sequencer = Arc::clone(op_sequencer);
                let journaled_op = Arc::clone(&op);
                let submitted = journal.submit(
                    seq,
                    payload,
                    Box::new(move || core.journaled(&journaled_sequencer, &journaled_op)),
                );
                if let Err(e) = submitted {
                    fatal(
                        Event::JournalFailed,
                        &[("seq", &seq), ("error", &e), ("code", &e.code())],
                    );
                }
                if mode == JournalMode::Parallel {
                    self.core.schedule(op_sequencer, op);
                }
            }
            _ => {
                self.sync.park_durable(seq, op.take_on_durable());
                self.core.schedule(op_sequencer, op);
            }
        }
        drop(submit);

        self.core.metrics.record_submit(cost.bytes);
        Ok(seq)
    }

    /// Submit and block until the op has applied and is durable
    pub fn apply_transactions(
        &self,
        sequencer: &Sequencer,
        transactions: Vec<Transaction>,
    ) -> StoreResult<u64> {
        let (applied_tx, applied_rx) = crossbeam_channel::bounded(1);
        let (durable_tx, durable_rx) = crossbeam_channel::bounded(1);
        let seq = self.submit_transactions(
            sequencer,
            transactions,
            Some(Box::new(move || {
                let _ = applied_tx.send(());
            })),
            Some(Box::new(move || {
                let _ = durable_tx.send(());
            })),
        )?;
        applied_rx.recv().map_err(|_| StoreError::ShuttingDown)?;
        durable_rx.recv().map_err(|_| StoreError::ShuttingDown)?;
        Ok(seq)
    }

    /// Block until everything submitted on `sequencer` so far has
    /// applied and, when journaling, been acked
    pub fn flush(&self, sequencer: &Sequencer) {
        sequencer.flush();
    }

    /// Block until every op submitted so far, on any sequencer, has applied
    pub fn flush_all(&self) {
        let target = self.submit.lock().last_seq;
        self.core.tracker.wait_for_applied(target);
    }

    /// Force a sync commit and return the committed seq
    pub fn sync(&self) -> StoreResult<u64> {
        self.sync.sync()
    }

    /// Force a sync commit; `callback` gets its outcome
    pub fn start_sync(&self, callback: SyncCallback) {
        self.sync.start_sync(callback);
    }

    /// Wait until everything submitted so far is applied and, when
    /// journaling, durable; then force a sync commit
    pub fn sync_and_flush(&self) -> StoreResult<u64> {
        let target = self.submit.lock().last_seq;
        self.core.tracker.wait_for_applied(target);
        if self.core.mode.is_journaled() {
            self.core.tracker.wait_for_durable(target);
        }
        self.sync.sync()
    }

    /// Block until the durability watermark reaches `seq`
    pub fn wait_for_durable(&self, seq: u64) {
        self.core.tracker.wait_for_durable(seq);
    }

    /// Like [`wait_for_durable`](Self::wait_for_durable) with a deadline.
    /// Returns true if the watermark reached `seq`.
    pub fn wait_for_durable_timeout(&self, seq: u64, timeout: Duration) -> bool {
        self.core.tracker.wait_for_durable_timeout(seq, timeout)
    }

    /// Current durability watermark
    pub fn durable_seq(&self) -> u64 {
        self.core.tracker.watermark()
    }

    pub fn stats(&self) -> StoreStats {
        let tracker = &self.core.tracker;
        let throttle = &self.core.throttle;
        let outstanding = throttle.outstanding();
        let max = throttle.current_max();
        StoreStats {
            journal_mode: self.core.mode,
            mounted_seq: self.mounted_seq,
            last_seq: self.submit.lock().last_seq,
            applied_seq: tracker.applied_boundary(),
            journaled_seq: tracker.journaled_boundary(),
            committed_seq: tracker.committed(),
            durable_seq: tracker.watermark(),
            outstanding_ops: outstanding.ops,
            outstanding_bytes: outstanding.bytes,
            max_ops: max.ops,
            max_bytes: max.bytes,
            committing: throttle.is_committing(),
            sequencers: self.live_sequencers().len() + 1,
            last_commit_at: self.sync.last_commit_at(),
            metrics: self.core.metrics.snapshot(),
        }
    }

    fn live_sequencers(&self) -> Vec<Arc<OpSequencer>> {
        self.sequencers
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Drain and stop the engine.
    ///
    /// New submissions are refused; every op submitted so far applies and,
    /// when journaling, is acked; workers stop;
    /// a final commit runs; then the sync thread, journal writer,
    /// finishers, flusher and watchdog stop. Returns the final commit's
    /// error, if any. Calling it again is a no-op.
    pub fn shutdown(&self) -> StoreResult<()> {
        {
            let mut submit = self.submit.lock();
            if !submit.accepting {
                return Ok(());
            }
            submit.accepting = false;
        }
        Logger::info(Event::StoreShutdown, &[]);

        // Drain by seq, not by sequencer: workers must outlive every op.
        let last_seq = self.submit.lock().last_seq;
        self.core.tracker.wait_for_applied(last_seq);
        if self.core.mode.is_journaled() {
            self.core.tracker.wait_for_journaled(last_seq);
        }
        if let Some(mut workers) = self.workers.lock().take() {
            workers.stop();
        }

        let result = self.sync.sync();
        self.sync.stop();
        if let Some(journal) = &self.journal {
            journal.stop();
        }

        self.core.applied.wait_for_empty();
        if result.is_ok() {
            self.core.durable.wait_for_empty();
        }
        self.core.applied.stop();
        self.core.durable.stop();

        if let Some(flusher) = self.flusher.lock().take() {
            flusher.stop();
        }
        if let Some(mut watchdog) = self.watchdog.lock().take() {
            watchdog.stop();
        }

        let committed = self.core.tracker.committed();
        Logger::info(
            Event::StoreShutdownComplete,
            &[("committed_seq", &committed), ("last_seq", &last_seq)],
        );
        result.map(|_| ())
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemStore;
    use crate::journal::MemJournal;
    use std::thread;

    fn config(mode: JournalMode) -> StoreConfig {
        StoreConfig {
            journal_mode: mode,
            max_sync_interval_secs: 3600.0,
            flusher: false,
            log_level: "error".to_string(),
            ..StoreConfig::default()
        }
    }

    fn mount(mode: JournalMode) -> (ObjectStore, Arc<MemStore>) {
        let backend = Arc::new(MemStore::new());
        let journal: Option<Arc<dyn JournalBackend>> = if mode.is_journaled() {
            Some(Arc::new(MemJournal::new()))
        } else {
            None
        };
        let store = ObjectStore::mount(config(mode), backend.clone(), journal).unwrap();
        (store, backend)
    }

    fn create(cid: &str) -> Vec<Transaction> {
        let mut tx = Transaction::new();
        tx.create_collection(cid);
        vec![tx]
    }

    #[test]
    fn test_mount_rejects_journal_mismatch() {
        let backend = Arc::new(MemStore::new());
        let err = ObjectStore::mount(config(JournalMode::WriteAhead), backend.clone(), None)
            .err()
            .unwrap();
        assert_eq!(err.code(), "OBJ_STORE_CONFIG");

        let journal: Arc<dyn JournalBackend> = Arc::new(MemJournal::new());
        assert!(ObjectStore::mount(config(JournalMode::None), backend, Some(journal)).is_err());
    }

    #[test]
    fn test_mount_rejects_unrepresentable_interval() {
        let backend = Arc::new(MemStore::new());
        let mut cfg = config(JournalMode::None);
        cfg.max_sync_interval_secs = 1e20;
        let err = ObjectStore::mount(cfg, backend, None).err().unwrap();
        assert_eq!(err.code(), "OBJ_STORE_CONFIG");
    }

    #[test]
    fn test_huge_sync_interval_mounts_and_syncs() {
        let backend = Arc::new(MemStore::new());
        let mut cfg = config(JournalMode::Parallel);
        cfg.max_sync_interval_secs = 1e18;
        let journal: Arc<dyn JournalBackend> = Arc::new(MemJournal::new());
        let store = ObjectStore::mount(cfg, backend.clone(), Some(journal)).unwrap();
        let seq = store
            .apply_transactions(&store.default_sequencer(), create("a"))
            .unwrap();
        store.shutdown().unwrap();
        assert_eq!(store.stats().committed_seq, seq);
        assert!(backend.stable_image().has_collection("a"));
    }

    #[test]
    fn test_apply_transactions_in_each_mode() {
        for mode in [JournalMode::WriteAhead, JournalMode::Parallel, JournalMode::None] {
            let (store, backend) = mount(mode);
            let seqr = store.create_sequencer("s");
            assert_eq!(store.apply_transactions(&seqr, create("a")).unwrap(), 1);
            assert_eq!(store.apply_transactions(&seqr, create("b")).unwrap(), 2);
            assert!(store.durable_seq() >= 2);
            assert!(backend.live_image().has_collection("b"));
            store.shutdown().unwrap();
        }
    }

    #[test]
    fn test_submit_after_shutdown_is_refused() {
        let (store, _) = mount(JournalMode::Parallel);
        store.shutdown().unwrap();
        let err = store
            .submit_transactions(&store.default_sequencer(), create("a"), None, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::ShuttingDown));
        store.shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_commits_everything_submitted() {
        let (store, backend) = mount(JournalMode::WriteAhead);
        let seqr = store.default_sequencer();
        for i in 0..10 {
            store
                .submit_transactions(&seqr, create(&format!("c{}", i)), None, None)
                .unwrap();
        }
        store.shutdown().unwrap();
        assert_eq!(store.stats().committed_seq, 10);
        assert!(backend.stable_image().has_collection("c9"));
    }

    #[test]
    fn test_shutdown_drains_op_waiting_on_journal_ack() {
        let backend = Arc::new(MemStore::new());
        let journal = Arc::new(MemJournal::new());
        journal.set_durable_limit(Some(0));
        let journal_backend: Arc<dyn JournalBackend> = journal.clone();
        let store = ObjectStore::mount(
            config(JournalMode::WriteAhead),
            backend.clone(),
            Some(journal_backend),
        )
        .unwrap();

        // A handle the store never registered in its sequencer list.
        let unlisted = Sequencer::new("unlisted");
        let seq = store
            .submit_transactions(&unlisted, create("a"), None, None)
            .unwrap();

        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::scope(|scope| {
            let store = &store;
            scope.spawn(move || {
                let _ = tx.send(store.shutdown());
            });
            assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
            journal.release();
            let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(result.is_ok());
        });

        assert_eq!(backend.applied_seqs("unlisted"), vec![seq]);
        assert!(backend.stable_image().has_collection("a"));
        assert_eq!(store.stats().committed_seq, seq);
    }

    #[test]
    fn test_stats_reflect_progress() {
        let (store, _) = mount(JournalMode::Parallel);
        let seqr = store.create_sequencer("s");
        store.apply_transactions(&seqr, create("a")).unwrap();
        let committed = store.sync().unwrap();
        assert_eq!(committed, 1);

        let stats = store.stats();
        assert_eq!(stats.last_seq, 1);
        assert_eq!(stats.applied_seq, 1);
        assert_eq!(stats.committed_seq, 1);
        assert_eq!(stats.durable_seq, 1);
        assert_eq!(stats.outstanding_ops, 0);
        assert_eq!(stats.sequencers, 2);
        assert!(stats.last_commit_at.is_some());
        assert_eq!(stats.metrics.ops_submitted, 1);
        assert!(stats.to_json().contains("\"journal_mode\":\"parallel\""));
    }
}
