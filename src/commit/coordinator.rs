//! Sync commit thread
//!
//! One commit cycle:
//!
//! 1. Raise the throttle to its committing limits
//! 2. Close the apply gate, drain open applies, pick `committing_seq`
//!    (the contiguous applied boundary); skip if nothing is new
//! 3. Reopen the gate and commit the backend through `committing_seq`
//! 4. Advance the committed seq and the durability watermark
//! 5. Trim the journal through `committing_seq`
//! 6. Release durability waiters parked for journal-less ops
//! 7. Restore the throttle and answer the sync waiters of this cycle
//!
//! A failed commit is reported to that cycle's waiters. Nothing moves:
//! the watermark, the journal and the parked waiters stay as they were.
//!
//! Cycles run every `max_sync_interval`, or sooner when forced, but
//! never closer together than `min_sync_interval`. Forced syncs that
//! arrive before a cycle starts share it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::backend::Backend;
use crate::crash_point::{maybe_crash, points};
use crate::dispatch::{HeartbeatHandle, HeartbeatMap, TurnTimeouts};
use crate::durability::{ApplyGate, DurabilityTracker};
use crate::finisher::{Completion, Finisher};
use crate::journal::JournalCoordinator;
use crate::observability::{Event, Logger, MetricsRegistry};
use crate::store::{StoreError, StoreResult};
use crate::throttle::Throttle;

/// Receives the committed seq of the cycle that covered the request
pub type SyncCallback = Box<dyn FnOnce(StoreResult<u64>) + Send + 'static>;

/// Timing for the sync thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncSettings {
    pub max_interval: Duration,
    pub min_interval: Duration,
    pub commit_timeout: Duration,
}

/// What a commit cycle reads and advances
pub struct SyncContext {
    pub backend: Arc<dyn Backend>,
    pub tracker: Arc<DurabilityTracker>,
    pub gate: Arc<ApplyGate>,
    pub throttle: Arc<Throttle>,
    pub journal: Option<Arc<JournalCoordinator>>,
    /// Where parked durability completions go once committed
    pub durable: Arc<Finisher>,
    pub metrics: Arc<MetricsRegistry>,
}

#[derive(Default)]
struct SyncState {
    force: bool,
    stopping: bool,
    waiters: Vec<SyncCallback>,
    parked: BTreeMap<u64, Option<Completion>>,
    last_commit_at: Option<DateTime<Utc>>,
}

struct Shared {
    ctx: SyncContext,
    settings: SyncSettings,
    state: Mutex<SyncState>,
    cond: Condvar,
}

/// Requests an early cycle; held by code that makes commits worth doing
#[derive(Clone)]
pub struct SyncTrigger {
    shared: Arc<Shared>,
}

impl SyncTrigger {
    pub fn nudge(&self) {
        self.shared.nudge();
    }
}

pub struct SyncCoordinator {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncCoordinator {
    pub fn start(
        ctx: SyncContext,
        settings: SyncSettings,
        heartbeats: &Arc<HeartbeatMap>,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            ctx,
            settings,
            state: Mutex::new(SyncState::default()),
            cond: Condvar::new(),
        });
        let heartbeat = heartbeats.register("sync");

        let thread_shared = Arc::clone(&shared);
        let thread_heartbeats = Arc::clone(heartbeats);
        let handle = thread::Builder::new()
            .name("sync".to_string())
            .spawn(move || {
                thread_shared.run(&heartbeat);
                thread_heartbeats.unregister(&heartbeat);
            })?;

        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Request a commit; `callback` runs once a cycle started after this
    /// call has finished
    pub fn start_sync(&self, callback: SyncCallback) {
        let mut state = self.shared.state.lock();
        if state.stopping {
            drop(state);
            callback(Err(StoreError::ShuttingDown));
            return;
        }
        state.waiters.push(callback);
        state.force = true;
        self.shared.cond.notify_all();
    }

    /// Forced commit; returns the committed seq
    pub fn sync(&self) -> StoreResult<u64> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.start_sync(Box::new(move |result| {
            let _ = tx.send(result);
        }));
        rx.recv().unwrap_or(Err(StoreError::ShuttingDown))
    }

    pub fn trigger(&self) -> SyncTrigger {
        SyncTrigger {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Hold the durability completion of a journal-less op until a
    /// commit covers `seq`
    pub fn park_durable(&self, seq: u64, completion: Option<Completion>) {
        self.shared.state.lock().parked.insert(seq, completion);
    }

    pub fn parked(&self) -> usize {
        self.shared.state.lock().parked.len()
    }

    /// Wall-clock time of the last successful commit
    pub fn last_commit_at(&self) -> Option<DateTime<Utc>> {
        self.shared.state.lock().last_commit_at
    }

    /// Run a final cycle, then stop the thread
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stopping = true;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SyncCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Shared {
    fn nudge(&self) {
        let mut state = self.state.lock();
        state.force = true;
        self.cond.notify_all();
    }

    fn run(&self, heartbeat: &HeartbeatHandle) {
        Logger::trace(Event::ThreadStart, &[("thread", &"sync")]);
        let mut last_cycle = Instant::now();
        let mut state = self.state.lock();
        loop {
            self.wait_for_cycle(&mut state, last_cycle);
            let stopping = state.stopping;
            state.force = false;
            let waiters = std::mem::take(&mut state.waiters);

            let result = MutexGuard::unlocked(&mut state, || self.cycle(heartbeat));
            last_cycle = Instant::now();
            MutexGuard::unlocked(&mut state, || {
                for waiter in waiters {
                    let result = match &result {
                        Ok(seq) => Ok(*seq),
                        Err(CycleError { seq, reason }) => Err(StoreError::CommitFailed {
                            committing_seq: *seq,
                            reason: reason.clone(),
                        }),
                    };
                    waiter(result);
                }
            });

            if stopping {
                break;
            }
        }
        let late = std::mem::take(&mut state.waiters);
        drop(state);
        for waiter in late {
            waiter(Err(StoreError::ShuttingDown));
        }
        Logger::trace(Event::ThreadStop, &[("thread", &"sync")]);
    }

    fn wait_for_cycle(&self, state: &mut MutexGuard<'_, SyncState>, last_cycle: Instant) {
        // An interval past the end of `Instant` means no timed cycle.
        let due = last_cycle.checked_add(self.settings.max_interval);
        while !state.force && !state.stopping {
            match due {
                Some(due) => {
                    if self.cond.wait_until(state, due).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(state),
            }
        }
        let Some(earliest) = last_cycle.checked_add(self.settings.min_interval) else {
            return;
        };
        while !state.stopping && Instant::now() < earliest {
            self.cond.wait_until(state, earliest);
        }
    }

    fn cycle(&self, heartbeat: &HeartbeatHandle) -> Result<u64, CycleError> {
        heartbeat.arm(TurnTimeouts::new(Duration::ZERO, self.settings.commit_timeout));
        self.ctx.throttle.set_committing(true);
        let result = self.commit();
        self.ctx.throttle.set_committing(false);
        heartbeat.clear();
        result
    }

    fn commit(&self) -> Result<u64, CycleError> {
        let ctx = &self.ctx;
        let Some(seq) = ctx.gate.commit_start(|| ctx.tracker.applied_boundary()) else {
            let committed = ctx.gate.last_committed();
            Logger::trace(Event::SyncCommitSkipped, &[("committed_seq", &committed)]);
            return Ok(committed);
        };
        ctx.gate.commit_started();

        let started = Instant::now();
        Logger::trace(Event::SyncCommitBegin, &[("committing_seq", &seq)]);
        maybe_crash(points::SYNC_BEFORE_COMMIT);
        if let Err(e) = ctx.backend.commit_to_stable_media(seq) {
            ctx.metrics.increment_sync_failures();
            Logger::error(
                Event::SyncCommitFailed,
                &[("committing_seq", &seq), ("error", &e), ("code", &e.code())],
            );
            return Err(CycleError {
                seq,
                reason: e.to_string(),
            });
        }
        maybe_crash(points::SYNC_AFTER_COMMIT);

        ctx.gate.commit_finish(seq);
        ctx.tracker.mark_committed(seq);
        ctx.metrics.increment_sync_commits();
        let ready = {
            let mut state = self.state.lock();
            state.last_commit_at = Some(Utc::now());
            let later = state.parked.split_off(&(seq + 1));
            std::mem::replace(&mut state.parked, later)
        };

        if let Some(journal) = &ctx.journal {
            if let Err(e) = journal.trim(seq) {
                Logger::warn(Event::JournalTrim, &[("error", &e), ("trim_seq", &seq)]);
            }
        }
        for (parked_seq, completion) in ready {
            ctx.durable.queue(parked_seq, completion);
        }

        let elapsed_ms = started.elapsed().as_millis();
        Logger::trace(
            Event::SyncCommitComplete,
            &[("committed_seq", &seq), ("elapsed_ms", &elapsed_ms)],
        );
        Ok(seq)
    }
}

struct CycleError {
    seq: u64,
    reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemStore;
    use crate::config::JournalMode;
    use crate::journal::{BatchLimits, JournalBackend, JournalError, MemJournal};
    use crate::throttle::ThrottleLimits;

    struct Fixture {
        store: Arc<MemStore>,
        tracker: Arc<DurabilityTracker>,
        durable: Arc<Finisher>,
        metrics: Arc<MetricsRegistry>,
        throttle: Arc<Throttle>,
        sync: SyncCoordinator,
    }

    fn fixture(mode: JournalMode, max_interval: Duration, journal: Option<Arc<MemJournal>>) -> Fixture {
        let store = Arc::new(MemStore::new());
        let tracker = Arc::new(DurabilityTracker::new(mode, 0));
        let durable = Arc::new(Finisher::start("test-durable", 1).unwrap());
        let metrics = Arc::new(MetricsRegistry::new());
        let throttle = Arc::new(Throttle::new(ThrottleLimits::unlimited()));
        let heartbeats = Arc::new(HeartbeatMap::new(Arc::clone(&metrics)));
        let journal = journal.map(|j| {
            let backend: Arc<dyn JournalBackend> = j;
            Arc::new(
                JournalCoordinator::start(
                    backend,
                    0,
                    BatchLimits::default(),
                    Arc::clone(&metrics),
                    Arc::new(|_: &JournalError| {}),
                )
                    .unwrap(),
            )
        });
        let sync = SyncCoordinator::start(
            SyncContext {
                backend: store.clone(),
                tracker: Arc::clone(&tracker),
                gate: Arc::new(ApplyGate::new(0)),
                throttle: Arc::clone(&throttle),
                journal,
                durable: Arc::clone(&durable),
                metrics: Arc::clone(&metrics),
            },
            SyncSettings {
                max_interval,
                min_interval: Duration::from_millis(1),
                commit_timeout: Duration::from_secs(60),
            },
            &heartbeats,
        )
        .unwrap();
        Fixture {
            store,
            tracker,
            durable,
            metrics,
            throttle,
            sync,
        }
    }

    fn applied(tracker: &DurabilityTracker, seqs: std::ops::RangeInclusive<u64>) {
        for seq in seqs {
            tracker.register(seq);
            tracker.mark_applied(seq);
        }
    }

    #[test]
    fn test_forced_sync_commits_applied_boundary() {
        let f = fixture(JournalMode::None, Duration::from_secs(3600), None);
        applied(&f.tracker, 1..=3);

        assert_eq!(f.sync.sync().unwrap(), 3);
        assert_eq!(f.store.commit_count(), 1);
        assert_eq!(f.tracker.committed(), 3);
        assert_eq!(f.tracker.watermark(), 3);
        assert!(f.sync.last_commit_at().is_some());
        assert!(!f.throttle.is_committing());
        assert_eq!(f.metrics.snapshot().sync_commits, 1);
    }

    #[test]
    fn test_nothing_new_skips_commit() {
        let f = fixture(JournalMode::None, Duration::from_secs(3600), None);
        applied(&f.tracker, 1..=2);
        assert_eq!(f.sync.sync().unwrap(), 2);
        assert_eq!(f.sync.sync().unwrap(), 2);
        assert_eq!(f.store.commit_count(), 1);
    }

    #[test]
    fn test_commit_failure_reaches_waiter_and_holds_watermark() {
        let f = fixture(JournalMode::None, Duration::from_secs(3600), None);
        applied(&f.tracker, 1..=2);
        f.store.set_fail_commits(true);

        let err = f.sync.sync().unwrap_err();
        assert_eq!(err.code(), "OBJ_STORE_COMMIT_FAILED");
        assert_eq!(f.tracker.watermark(), 0);
        assert_eq!(f.metrics.snapshot().sync_failures, 1);

        f.store.set_fail_commits(false);
        assert_eq!(f.sync.sync().unwrap(), 2);
        assert_eq!(f.tracker.watermark(), 2);
    }

    #[test]
    fn test_overlapping_syncs_share_commits() {
        let f = fixture(JournalMode::None, Duration::from_secs(3600), None);
        applied(&f.tracker, 1..=5);

        let (tx, rx) = crossbeam_channel::unbounded();
        for _ in 0..10 {
            let tx = tx.clone();
            f.sync.start_sync(Box::new(move |r| tx.send(r).unwrap()));
        }
        for _ in 0..10 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap(), 5);
        }
        assert_eq!(f.store.commit_count(), 1);
    }

    #[test]
    fn test_parked_durables_fire_on_covering_commit() {
        let f = fixture(JournalMode::None, Duration::from_secs(3600), None);
        let (tx, rx) = crossbeam_channel::unbounded();
        for seq in 1..=3u64 {
            let tx = tx.clone();
            f.sync.park_durable(seq, Some(Box::new(move || tx.send(seq).unwrap())));
        }
        applied(&f.tracker, 1..=2);
        f.sync.sync().unwrap();
        f.durable.wait_for_empty();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(f.sync.parked(), 1);

        applied(&f.tracker, 3..=3);
        f.sync.sync().unwrap();
        f.durable.wait_for_empty();
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_trigger_starts_early_cycle() {
        let f = fixture(JournalMode::None, Duration::from_secs(3600), None);
        applied(&f.tracker, 1..=1);
        f.sync.trigger().nudge();
        assert!(f.tracker.wait_for_durable_timeout(1, Duration::from_secs(5)));
    }

    #[test]
    fn test_unbounded_interval_waits_for_force() {
        let f = fixture(JournalMode::None, Duration::MAX, None);
        applied(&f.tracker, 1..=2);
        assert!(!f.tracker.wait_for_durable_timeout(1, Duration::from_millis(30)));
        assert_eq!(f.sync.sync().unwrap(), 2);
        f.sync.stop();
        assert_eq!(f.store.commit_count(), 1);
    }

    #[test]
    fn test_interval_commit_without_force() {
        let f = fixture(JournalMode::None, Duration::from_millis(20), None);
        applied(&f.tracker, 1..=1);
        assert!(f.tracker.wait_for_durable_timeout(1, Duration::from_secs(5)));
    }

    #[test]
    fn test_commit_trims_journal() {
        let journal = Arc::new(MemJournal::new());
        for seq in 1..=4 {
            journal.append(seq, b"x").unwrap();
        }
        journal.ack(crate::journal::AppendToken::new(4)).unwrap();
        let f = fixture(JournalMode::WriteAhead, Duration::from_secs(3600), Some(journal.clone()));
        applied(&f.tracker, 1..=3);

        assert_eq!(f.sync.sync().unwrap(), 3);
        assert_eq!(journal.trimmed_thru(), 3);
        assert_eq!(journal.len(), 1);
    }

    #[test]
    fn test_stop_runs_final_commit_and_rejects_later_syncs() {
        let f = fixture(JournalMode::None, Duration::from_secs(3600), None);
        applied(&f.tracker, 1..=2);
        f.sync.stop();
        assert_eq!(f.tracker.committed(), 2);
        assert!(matches!(f.sync.sync(), Err(StoreError::ShuttingDown)));
    }
}
