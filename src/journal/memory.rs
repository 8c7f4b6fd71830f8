//! In-memory journal
//!
//! Behaves like a device whose writes become durable on ack. Test
//! controls: a durable limit that persists records only up to a seq and
//! holds any ack beyond it, failure injection, and `crash_image()` which
//! keeps exactly what was durable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::backend::{AppendToken, JournalBackend, JournalEntry};
use super::errors::{JournalError, JournalResult};

#[derive(Debug, Default)]
struct MemState {
    records: BTreeMap<u64, Vec<u8>>,
    durable_thru: u64,
    trimmed_thru: u64,
    durable_limit: Option<u64>,
}

#[derive(Debug, Default)]
pub struct MemJournal {
    state: Mutex<MemState>,
    cond: Condvar,
    fail_append: AtomicBool,
    fail_ack: AtomicBool,
    acks: AtomicU64,
}

impl MemJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist records only through `limit`; acks beyond it block until
    /// the limit is lifted
    pub fn set_durable_limit(&self, limit: Option<u64>) {
        self.state.lock().durable_limit = limit;
        self.cond.notify_all();
    }

    /// Lift the durable limit and let held acks complete
    pub fn release(&self) {
        self.set_durable_limit(None);
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_append.store(fail, Ordering::SeqCst);
    }

    pub fn fail_acks(&self, fail: bool) {
        self.fail_ack.store(fail, Ordering::SeqCst);
    }

    /// What survives a power loss
    pub fn crash_image(&self) -> MemJournal {
        let state = self.state.lock();
        let records = state
            .records
            .range(..=state.durable_thru)
            .map(|(seq, payload)| (*seq, payload.clone()))
            .collect();
        MemJournal {
            state: Mutex::new(MemState {
                records,
                durable_thru: state.durable_thru,
                trimmed_thru: state.trimmed_thru,
                durable_limit: None,
            }),
            ..MemJournal::default()
        }
    }

    pub fn durable_thru(&self) -> u64 {
        self.state.lock().durable_thru
    }

    pub fn trimmed_thru(&self) -> u64 {
        self.state.lock().trimmed_thru
    }

    /// Untrimmed records held, durable or not
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    pub fn ack_count(&self) -> u64 {
        self.acks.load(Ordering::SeqCst)
    }

    /// Wait until records through `seq` are durable. Returns false on timeout.
    pub fn wait_durable_thru(&self, seq: u64, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            let mut state = self.state.lock();
            while state.durable_thru < seq {
                self.cond.wait(&mut state);
            }
            return true;
        };
        let mut state = self.state.lock();
        while state.durable_thru < seq {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return state.durable_thru >= seq;
            }
        }
        true
    }
}

impl JournalBackend for MemJournal {
    fn append(&self, seq: u64, payload: &[u8]) -> JournalResult<AppendToken> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(JournalError::append_refused(format!("append of seq {}", seq)));
        }
        self.state.lock().records.insert(seq, payload.to_vec());
        Ok(AppendToken::new(seq))
    }

    fn ack(&self, token: AppendToken) -> JournalResult<()> {
        if self.fail_ack.load(Ordering::SeqCst) {
            return Err(JournalError::sync_failed(
                format!("ack through seq {}", token.seq()),
                None,
            ));
        }

        let mut state = self.state.lock();
        loop {
            let reachable = match state.durable_limit {
                Some(limit) => token.seq().min(limit),
                None => token.seq(),
            };
            if reachable > state.durable_thru {
                state.durable_thru = reachable;
                self.cond.notify_all();
            }
            if state.durable_thru >= token.seq() {
                break;
            }
            self.cond.wait(&mut state);
        }
        drop(state);

        self.acks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn trim(&self, up_to_seq: u64) -> JournalResult<()> {
        let mut state = self.state.lock();
        let keep = state.records.split_off(&(up_to_seq + 1));
        state.records = keep;
        state.trimmed_thru = state.trimmed_thru.max(up_to_seq);
        Ok(())
    }

    fn replay(&self, after_seq: u64) -> JournalResult<Vec<JournalEntry>> {
        let state = self.state.lock();
        let from = after_seq.max(state.trimmed_thru) + 1;
        if state.durable_thru < from {
            return Ok(Vec::new());
        }
        Ok(state
            .records
            .range(from..=state.durable_thru)
            .map(|(seq, payload)| JournalEntry {
                seq: *seq,
                payload: payload.clone(),
            })
            .collect())
    }
}
