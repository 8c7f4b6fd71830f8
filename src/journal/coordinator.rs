//! Journal writer thread with group commit
//!
//! Submissions queue on a channel in seq order. The writer drains
//! whatever has arrived, up to the batch limits, appends each record,
//! acks the last token of the batch once, and only then runs the
//! batch's completions in seq order. No completion ever runs before its
//! record is durable.
//!
//! A failed append or ack cannot be recovered from here: the fatal hook
//! is called and the writer stops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use super::backend::JournalBackend;
use super::errors::{JournalError, JournalResult};
use crate::config::StoreConfig;
use crate::crash_point::{maybe_crash, points};
use crate::observability::{Event, Logger, MetricsRegistry};

/// Runs once the submission's record is durable
pub type JournalCompletion = Box<dyn FnOnce() + Send + 'static>;

/// Called when the journal can no longer guarantee durability
pub type JournalFatalHook = Arc<dyn Fn(&JournalError) + Send + Sync + 'static>;

/// Bounds on one group-commit write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_entries: usize,
    /// Payload byte budget; the first record of a batch is always taken
    pub max_bytes: u64,
}

impl BatchLimits {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            max_entries: config.journal_max_write_entries,
            max_bytes: config.journal_max_write_bytes,
        }
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

struct Submission {
    seq: u64,
    payload: Vec<u8>,
    on_durable: JournalCompletion,
}

pub struct JournalCoordinator {
    backend: Arc<dyn JournalBackend>,
    metrics: Arc<MetricsRegistry>,
    sender: Mutex<Option<Sender<Submission>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    acked_thru: Arc<AtomicU64>,
}

impl JournalCoordinator {
    /// Start the writer thread. `acked_from` is the seq already durable
    /// at mount.
    pub fn start(
        backend: Arc<dyn JournalBackend>,
        acked_from: u64,
        limits: BatchLimits,
        metrics: Arc<MetricsRegistry>,
        on_fatal: JournalFatalHook,
    ) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded();
        let acked_thru = Arc::new(AtomicU64::new(acked_from));

        let writer = Writer {
            backend: Arc::clone(&backend),
            limits,
            metrics: Arc::clone(&metrics),
            on_fatal,
            acked_thru: Arc::clone(&acked_thru),
        };
        let handle = thread::Builder::new()
            .name("journal-writer".to_string())
            .spawn(move || writer.run(receiver))?;

        Ok(Self {
            backend,
            metrics,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
            acked_thru,
        })
    }

    /// Queue a record. Submissions must arrive in seq order.
    pub fn submit(
        &self,
        seq: u64,
        payload: Vec<u8>,
        on_durable: JournalCompletion,
    ) -> JournalResult<()> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or_else(JournalError::closed)?;
        sender
            .send(Submission {
                seq,
                payload,
                on_durable,
            })
            .map_err(|_| JournalError::closed())
    }

    /// Reclaim journal space through `seq`
    pub fn trim(&self, seq: u64) -> JournalResult<()> {
        maybe_crash(points::JOURNAL_BEFORE_TRIM);
        self.backend.trim(seq)?;
        self.metrics.increment_journal_trims();
        Logger::trace(Event::JournalTrim, &[("trimmed_thru", &seq)]);
        Ok(())
    }

    /// Highest seq whose batch has been acked
    pub fn acked_thru(&self) -> u64 {
        self.acked_thru.load(Ordering::SeqCst)
    }

    pub fn backend(&self) -> &Arc<dyn JournalBackend> {
        &self.backend
    }

    /// Finish every queued submission, then stop the writer
    pub fn stop(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for JournalCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Writer {
    backend: Arc<dyn JournalBackend>,
    limits: BatchLimits,
    metrics: Arc<MetricsRegistry>,
    on_fatal: JournalFatalHook,
    acked_thru: Arc<AtomicU64>,
}

impl Writer {
    fn run(self, receiver: Receiver<Submission>) {
        Logger::trace(Event::ThreadStart, &[("thread", &"journal-writer")]);
        let mut carried = None;
        loop {
            let first = match carried.take() {
                Some(submission) => submission,
                None => match receiver.recv() {
                    Ok(submission) => submission,
                    Err(_) => break,
                },
            };
            let batch = self.fill_batch(first, &receiver, &mut carried);
            if let Err(e) = self.write_batch(&batch) {
                Logger::error(
                    Event::JournalFailed,
                    &[("error", &e), ("first_seq", &batch[0].seq)],
                );
                (self.on_fatal)(&e);
                break;
            }
            for submission in batch {
                (submission.on_durable)();
            }
        }
        Logger::trace(Event::ThreadStop, &[("thread", &"journal-writer")]);
    }

    /// Gather queued submissions behind `first` until a limit is hit. A
    /// submission that would overflow the byte budget is left in `carried`
    /// to open the next batch.
    fn fill_batch(
        &self,
        first: Submission,
        receiver: &Receiver<Submission>,
        carried: &mut Option<Submission>,
    ) -> Vec<Submission> {
        let mut bytes = first.payload.len() as u64;
        let mut batch = vec![first];
        while batch.len() < self.limits.max_entries {
            let Ok(next) = receiver.try_recv() else {
                break;
            };
            let len = next.payload.len() as u64;
            if bytes + len > self.limits.max_bytes {
                *carried = Some(next);
                break;
            }
            bytes += len;
            batch.push(next);
        }
        batch
    }

    fn write_batch(&self, batch: &[Submission]) -> JournalResult<()> {
        let mut last_token = None;
        let mut bytes = 0u64;
        for submission in batch {
            last_token = Some(self.backend.append(submission.seq, &submission.payload)?);
            bytes += submission.payload.len() as u64;
        }
        let Some(token) = last_token else {
            return Ok(());
        };

        maybe_crash(points::JOURNAL_BEFORE_ACK);
        self.backend.ack(token)?;
        maybe_crash(points::JOURNAL_AFTER_ACK);

        self.acked_thru.fetch_max(token.seq(), Ordering::SeqCst);
        self.metrics.record_journal_batch(batch.len() as u64, bytes);
        let records = batch.len();
        Logger::trace(
            Event::JournalAck,
            &[("records", &records), ("through_seq", &token.seq())],
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{AppendToken, JournalEntry, JournalErrorCode, MemJournal};
    use std::time::{Duration, Instant};

    fn no_fatal() -> JournalFatalHook {
        Arc::new(|e: &JournalError| panic!("unexpected journal failure: {}", e))
    }

    /// Records (records, bytes) of every write between acks
    #[derive(Default)]
    struct BatchRecorder {
        inner: MemJournal,
        open: Mutex<(usize, u64)>,
        batches: Mutex<Vec<(usize, u64)>>,
    }

    impl JournalBackend for BatchRecorder {
        fn append(&self, seq: u64, payload: &[u8]) -> JournalResult<AppendToken> {
            {
                let mut open = self.open.lock();
                open.0 += 1;
                open.1 += payload.len() as u64;
            }
            self.inner.append(seq, payload)
        }

        fn ack(&self, token: AppendToken) -> JournalResult<()> {
            let batch = std::mem::take(&mut *self.open.lock());
            self.batches.lock().push(batch);
            self.inner.ack(token)
        }

        fn trim(&self, up_to_seq: u64) -> JournalResult<()> {
            self.inner.trim(up_to_seq)
        }

        fn replay(&self, after_seq: u64) -> JournalResult<Vec<JournalEntry>> {
            self.inner.replay(after_seq)
        }
    }

    /// Hold the first ack so everything after seq 1 queues up, then
    /// release and return the batches the writer formed
    fn batches_for(limits: BatchLimits, payload_lens: &[usize]) -> Vec<(usize, u64)> {
        let recorder = Arc::new(BatchRecorder::default());
        recorder.inner.set_durable_limit(Some(0));
        let coordinator = JournalCoordinator::start(
            recorder.clone(),
            0,
            limits,
            Arc::new(MetricsRegistry::new()),
            no_fatal(),
        )
        .unwrap();

        let fired = Arc::new(Mutex::new(Vec::new()));
        let submit = |seq: u64, len: usize| {
            let fired = Arc::clone(&fired);
            coordinator
                .submit(seq, vec![0u8; len], Box::new(move || fired.lock().push(seq)))
                .unwrap();
        };
        submit(1, 1);
        let deadline = Instant::now() + Duration::from_secs(5);
        while recorder.batches.lock().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        for (i, len) in payload_lens.iter().enumerate() {
            submit(i as u64 + 2, *len);
        }
        recorder.inner.release();
        coordinator.stop();

        let last = payload_lens.len() as u64 + 1;
        assert_eq!(*fired.lock(), (1..=last).collect::<Vec<_>>());
        let batches = recorder.batches.lock();
        assert_eq!(batches[0], (1, 1));
        batches[1..].to_vec()
    }

    #[test]
    fn test_batch_capped_by_entries() {
        let limits = BatchLimits {
            max_entries: 3,
            max_bytes: u64::MAX,
        };
        assert_eq!(
            batches_for(limits, &[10; 10]),
            vec![(3, 30), (3, 30), (3, 30), (1, 10)]
        );
    }

    #[test]
    fn test_batch_capped_by_bytes_and_oversized_record_goes_alone() {
        let limits = BatchLimits {
            max_entries: 100,
            max_bytes: 25,
        };
        assert_eq!(
            batches_for(limits, &[10, 10, 40, 10, 10, 10]),
            vec![(2, 20), (1, 40), (2, 20), (1, 10)]
        );
    }

    #[test]
    fn test_ack_failure_calls_fatal_hook_without_completing() {
        let journal = Arc::new(MemJournal::new());
        journal.fail_acks(true);
        let (tx, rx) = crossbeam_channel::unbounded();
        let coordinator = JournalCoordinator::start(
            journal.clone(),
            0,
            BatchLimits::default(),
            Arc::new(MetricsRegistry::new()),
            Arc::new(move |e: &JournalError| {
                let _ = tx.send((e.code(), e.is_fatal()));
            }),
        )
        .unwrap();

        coordinator
            .submit(1, b"x".to_vec(), Box::new(|| panic!("must not complete")))
            .unwrap();
        let (code, fatal) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(code, JournalErrorCode::ObjJournalSyncFailed);
        assert!(fatal);
        coordinator.stop();
        assert_eq!(coordinator.acked_thru(), 0);
        assert_eq!(journal.durable_thru(), 0);
    }

    #[test]
    fn test_completions_fire_in_seq_order_after_ack() {
        let journal = Arc::new(MemJournal::new());
        let metrics = Arc::new(MetricsRegistry::new());
        let coordinator = JournalCoordinator::start(
            journal.clone(),
            0,
            BatchLimits::default(),
            Arc::clone(&metrics),
            no_fatal(),
        )
        .unwrap();

        let fired = Arc::new(Mutex::new(Vec::new()));
        for seq in 1..=20u64 {
            let fired = Arc::clone(&fired);
            let durable_check = Arc::clone(&journal);
            coordinator
                .submit(
                    seq,
                    vec![0u8; 10],
                    Box::new(move || {
                        assert!(durable_check.durable_thru() >= seq);
                        fired.lock().push(seq);
                    }),
                )
                .unwrap();
        }
        coordinator.stop();

        assert_eq!(*fired.lock(), (1..=20).collect::<Vec<_>>());
        assert_eq!(coordinator.acked_thru(), 20);
        let snap = metrics.snapshot();
        assert_eq!(snap.journal_records, 20);
        assert_eq!(snap.journal_bytes, 200);
        assert!(snap.journal_batches >= 1 && snap.journal_batches <= 20);
        assert_eq!(journal.ack_count(), snap.journal_batches);
    }

    #[test]
    fn test_held_ack_holds_completions() {
        let journal = Arc::new(MemJournal::new());
        journal.set_durable_limit(Some(0));
        let coordinator = JournalCoordinator::start(
            journal.clone(),
            0,
            BatchLimits::default(),
            Arc::new(MetricsRegistry::new()),
            no_fatal(),
        )
        .unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        coordinator
            .submit(1, b"x".to_vec(), Box::new(move || tx.send(1u64).unwrap()))
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        journal.release();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    }

    #[test]
    fn test_append_failure_calls_fatal_hook_and_closes() {
        let journal = Arc::new(MemJournal::new());
        journal.fail_appends(true);
        let (tx, rx) = crossbeam_channel::unbounded();
        let coordinator = JournalCoordinator::start(
            journal.clone(),
            0,
            BatchLimits::default(),
            Arc::new(MetricsRegistry::new()),
            Arc::new(move |e: &JournalError| {
                let _ = tx.send(e.code().code());
            }),
        )
        .unwrap();

        coordinator
            .submit(1, b"x".to_vec(), Box::new(|| panic!("must not complete")))
            .unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            "OBJ_JOURNAL_APPEND_FAILED"
        );
        coordinator.stop();
        assert!(coordinator.submit(2, Vec::new(), Box::new(|| {})).is_err());
    }

    #[test]
    fn test_trim_passes_through() {
        let journal = Arc::new(MemJournal::new());
        let coordinator = JournalCoordinator::start(
            journal.clone(),
            0,
            BatchLimits::default(),
            Arc::new(MetricsRegistry::new()),
            no_fatal(),
        )
        .unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        coordinator
            .submit(1, b"x".to_vec(), Box::new(move || tx.send(()).unwrap()))
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        coordinator.trim(1).unwrap();
        assert_eq!(journal.trimmed_thru(), 1);
        assert!(journal.is_empty());
    }
}
