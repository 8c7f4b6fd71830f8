//! Engine state shared by workers and journal completions
//!
//! An op retires once every part of it is done: the apply, and the
//! journal ack when journaling. Retirement returns its throttle cost
//! and, when journaling, releases its durability completion.

use std::sync::Arc;

use super::fatal;
use crate::backend::{ApplyContext, Backend};
use crate::commit::SyncTrigger;
use crate::config::JournalMode;
use crate::crash_point::{maybe_crash, points};
use crate::dispatch::{DispatchQueue, HeartbeatHandle, WorkSource};
use crate::durability::{ApplyGate, DurabilityTracker};
use crate::finisher::Finisher;
use crate::flusher::FlushQueue;
use crate::observability::{Event, MetricsRegistry};
use crate::sequencer::{Op, OpSequencer};
use crate::throttle::Throttle;

pub(crate) struct StoreCore {
    pub(crate) mode: JournalMode,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) throttle: Arc<Throttle>,
    pub(crate) tracker: Arc<DurabilityTracker>,
    pub(crate) gate: Arc<ApplyGate>,
    pub(crate) applied: Finisher,
    pub(crate) durable: Arc<Finisher>,
    pub(crate) ready: DispatchQueue<Arc<OpSequencer>>,
    pub(crate) flush_queue: FlushQueue,
    /// Set without a journal: applied ops only become durable by commit
    pub(crate) sync_trigger: Option<SyncTrigger>,
    pub(crate) metrics: Arc<MetricsRegistry>,
}

impl StoreCore {
    /// Queue an op on its sequencer, scheduling the sequencer if idle
    pub(crate) fn schedule(&self, sequencer: &Arc<OpSequencer>, op: Arc<Op>) {
        if sequencer.enqueue(op) {
            self.ready.push(Arc::clone(sequencer));
        }
    }

    /// The journal record of `op` is durable.
    ///
    /// Runs on the journal writer thread, in seq order.
    pub(crate) fn journaled(&self, sequencer: &Arc<OpSequencer>, op: &Arc<Op>) {
        // Queue before dropping the journal marker so a concurrent
        // flush always sees the op in one queue or the other.
        if self.mode == JournalMode::WriteAhead {
            self.schedule(sequencer, Arc::clone(op));
        }
        sequencer.dequeue_journal();
        self.tracker.mark_journaled(op.seq());
        if op.complete_part() {
            self.retire(op);
        }
    }

    fn apply(&self, op: &Op, sequencer: &str) {
        let ctx = ApplyContext::new(op.seq(), sequencer, false, &self.flush_queue);

        self.gate.begin_apply();
        maybe_crash(points::APPLY_BEFORE);
        for tx in op.transactions() {
            if let Err(e) = self.backend.apply(tx, &ctx) {
                let seq = op.seq();
                fatal(
                    Event::ApplyFailed,
                    &[
                        ("seq", &seq),
                        ("sequencer", &sequencer),
                        ("error", &e),
                        ("code", &e.code()),
                    ],
                );
            }
        }
        maybe_crash(points::APPLY_AFTER);
        self.tracker.mark_applied(op.seq());
        self.gate.end_apply();

        self.metrics.increment_applied();
        self.applied.queue(op.seq(), op.take_on_applied());
        if op.complete_part() {
            self.retire(op);
        }
        if let Some(trigger) = &self.sync_trigger {
            trigger.nudge();
        }
    }

    fn retire(&self, op: &Op) {
        self.throttle.release(op.cost());
        if self.mode.is_journaled() {
            self.durable.queue(op.seq(), op.take_on_durable());
        }
    }
}

impl WorkSource for StoreCore {
    type Item = Arc<OpSequencer>;

    fn try_dequeue(&self) -> Option<Arc<OpSequencer>> {
        self.ready.pop()
    }

    fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }

    /// One turn: apply the sequencer's head op, then hand the sequencer
    /// back to the queue if it has more
    fn process_one(&self, sequencer: Arc<OpSequencer>, _heartbeat: &HeartbeatHandle) {
        {
            let guard = sequencer.lock_apply();
            if let Some(op) = guard.peek() {
                self.apply(&op, sequencer.name());
                guard.dequeue();
            }
        }
        if sequencer.finish_turn() {
            self.ready.push(sequencer);
        }
    }
}
