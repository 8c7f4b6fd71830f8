//! Per-stream ordering domain
//!
//! Two lock domains:
//! - `queues` guards `pending`, `journal_pending` and the scheduled
//!   flag; journal acks only ever take this one.
//! - `apply_lock` is held by the one worker applying this stream's head
//!   op, across the backend call.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::op::Op;

#[derive(Default)]
struct Queues {
    pending: VecDeque<Arc<Op>>,
    journal_pending: VecDeque<u64>,
    /// In the dispatch queue or held by a worker
    scheduled: bool,
}

impl Queues {
    fn drained_through(&self, target: u64) -> bool {
        self.pending.front().map_or(true, |op| op.seq() > target)
            && self.journal_pending.front().map_or(true, |seq| *seq > target)
    }

    fn flush_target(&self) -> Option<u64> {
        let pending = self.pending.back().map(|op| op.seq());
        let journal = self.journal_pending.back().copied();
        pending.max(journal)
    }
}

pub struct OpSequencer {
    name: String,
    queues: Mutex<Queues>,
    cond: Condvar,
    apply_lock: Mutex<()>,
}

impl OpSequencer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queues: Mutex::new(Queues::default()),
            cond: Condvar::new(),
            apply_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append an op. Returns true if the caller must hand this
    /// sequencer to the dispatch queue.
    pub fn enqueue(&self, op: Arc<Op>) -> bool {
        let mut queues = self.queues.lock();
        debug_assert!(
            queues.pending.back().map_or(true, |last| last.seq() < op.seq()),
            "op {} enqueued out of order",
            op.seq()
        );
        queues.pending.push_back(op);
        if queues.scheduled {
            false
        } else {
            queues.scheduled = true;
            true
        }
    }

    /// Record a seq handed to the journal
    pub fn queue_journal(&self, seq: u64) {
        let mut queues = self.queues.lock();
        debug_assert!(queues.journal_pending.back().map_or(true, |last| *last < seq));
        queues.journal_pending.push_back(seq);
    }

    /// Remove the journal head once its record is durable
    pub fn dequeue_journal(&self) -> Option<u64> {
        let seq = self.queues.lock().journal_pending.pop_front();
        self.cond.notify_all();
        seq
    }

    /// Take the apply lock. Blocks while another worker holds it.
    pub fn lock_apply(&self) -> ApplyGuard<'_> {
        ApplyGuard {
            sequencer: self,
            _guard: self.apply_lock.lock(),
        }
    }

    /// End a worker turn. Returns true if ops remain, in which case the
    /// sequencer stays scheduled and must be re-enqueued.
    pub fn finish_turn(&self) -> bool {
        let mut queues = self.queues.lock();
        if queues.pending.is_empty() {
            queues.scheduled = false;
            false
        } else {
            true
        }
    }

    /// Block until every op queued before the call has applied and
    /// every journal submission before the call has been acked
    pub fn flush(&self) {
        let mut queues = self.queues.lock();
        let Some(target) = queues.flush_target() else {
            return;
        };
        while !queues.drained_through(target) {
            self.cond.wait(&mut queues);
        }
    }

    /// [`flush`](Self::flush) with a deadline. Returns false on timeout.
    pub fn flush_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.flush();
            return true;
        };
        let mut queues = self.queues.lock();
        let Some(target) = queues.flush_target() else {
            return true;
        };
        while !queues.drained_through(target) {
            if self.cond.wait_until(&mut queues, deadline).timed_out() {
                return queues.drained_through(target);
            }
        }
        true
    }

    pub fn pending_len(&self) -> usize {
        self.queues.lock().pending.len()
    }

    pub fn journal_pending_len(&self) -> usize {
        self.queues.lock().journal_pending.len()
    }

    pub fn is_idle(&self) -> bool {
        let queues = self.queues.lock();
        queues.pending.is_empty() && queues.journal_pending.is_empty()
    }

    pub fn is_scheduled(&self) -> bool {
        self.queues.lock().scheduled
    }
}

impl Drop for OpSequencer {
    fn drop(&mut self) {
        debug_assert!(
            self.queues.get_mut().pending.is_empty(),
            "sequencer {} dropped with pending ops",
            self.name
        );
    }
}

impl std::fmt::Debug for OpSequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpSequencer").field("name", &self.name).finish()
    }
}

/// Exclusive right to apply a sequencer's head op
pub struct ApplyGuard<'a> {
    sequencer: &'a OpSequencer,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> ApplyGuard<'a> {
    /// The head op, left in place so flush keeps waiting for it
    pub fn peek(&self) -> Option<Arc<Op>> {
        self.sequencer.queues.lock().pending.front().cloned()
    }

    /// Remove the head op after it has applied
    pub fn dequeue(&self) -> Option<Arc<Op>> {
        let op = self.sequencer.queues.lock().pending.pop_front();
        self.sequencer.cond.notify_all();
        op
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn op(seq: u64) -> Arc<Op> {
        Arc::new(Op::new(seq, Vec::new(), None, None, true))
    }

    #[test]
    fn test_enqueue_schedules_once() {
        let sequencer = OpSequencer::new("s");
        assert!(sequencer.enqueue(op(1)));
        assert!(!sequencer.enqueue(op(2)));
        assert!(sequencer.is_scheduled());

        let guard = sequencer.lock_apply();
        assert_eq!(guard.peek().unwrap().seq(), 1);
        assert_eq!(guard.dequeue().unwrap().seq(), 1);
        drop(guard);
        assert!(sequencer.finish_turn());

        sequencer.lock_apply().dequeue();
        assert!(!sequencer.finish_turn());
        assert!(!sequencer.is_scheduled());
        assert!(sequencer.enqueue(op(3)));
        sequencer.lock_apply().dequeue();
    }

    #[test]
    fn test_flush_on_idle_returns_immediately() {
        let sequencer = OpSequencer::new("idle");
        sequencer.flush();
        assert!(sequencer.flush_timeout(Duration::from_millis(1)));
        assert!(sequencer.flush_timeout(Duration::MAX));
    }

    #[test]
    fn test_flush_waits_for_apply_and_journal() {
        let sequencer = Arc::new(OpSequencer::new("s"));
        sequencer.queue_journal(1);
        sequencer.enqueue(op(1));
        sequencer.queue_journal(2);
        sequencer.enqueue(op(2));

        let flushed = Arc::new(AtomicBool::new(false));
        let handle = {
            let sequencer = Arc::clone(&sequencer);
            let flushed = Arc::clone(&flushed);
            thread::spawn(move || {
                sequencer.flush();
                flushed.store(true, Ordering::SeqCst);
            })
        };

        {
            let guard = sequencer.lock_apply();
            guard.dequeue();
            guard.dequeue();
        }
        assert_eq!(sequencer.dequeue_journal(), Some(1));
        thread::sleep(Duration::from_millis(30));
        assert!(!flushed.load(Ordering::SeqCst));

        assert_eq!(sequencer.dequeue_journal(), Some(2));
        handle.join().unwrap();
        assert!(flushed.load(Ordering::SeqCst));
        assert!(sequencer.is_idle());
    }

    #[test]
    fn test_flush_timeout_reports_outstanding() {
        let sequencer = OpSequencer::new("s");
        sequencer.enqueue(op(1));
        sequencer.lock_apply().dequeue();
        sequencer.queue_journal(1);
        assert!(!sequencer.flush_timeout(Duration::from_millis(10)));
        sequencer.dequeue_journal();
        sequencer.enqueue(op(5));
        assert!(!sequencer.flush_timeout(Duration::from_millis(10)));
        sequencer.lock_apply().dequeue();
        assert!(sequencer.flush_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_apply_lock_is_exclusive() {
        let sequencer = Arc::new(OpSequencer::new("s"));
        let guard = sequencer.lock_apply();
        let acquired = Arc::new(AtomicBool::new(false));
        let handle = {
            let sequencer = Arc::clone(&sequencer);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _guard = sequencer.lock_apply();
                acquired.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
