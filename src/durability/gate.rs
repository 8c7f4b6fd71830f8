//! Apply gate between worker applies and sync commits
//!
//! A commit must not capture a half-applied op. `commit_start` closes
//! the gate to new applies, waits for the open ones to finish and picks
//! the sequence to commit. `commit_started` reopens the gate before the
//! media commit itself, so applies only stall for the drain.

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct GateState {
    open_applies: usize,
    blocked: bool,
    last_committed: u64,
}

#[derive(Debug)]
pub struct ApplyGate {
    state: Mutex<GateState>,
    cond: Condvar,
}

impl ApplyGate {
    pub fn new(last_committed: u64) -> Self {
        Self {
            state: Mutex::new(GateState {
                open_applies: 0,
                blocked: false,
                last_committed,
            }),
            cond: Condvar::new(),
        }
    }

    /// Enter an apply; blocks while a commit is starting
    pub fn begin_apply(&self) {
        let mut state = self.state.lock();
        while state.blocked {
            self.cond.wait(&mut state);
        }
        state.open_applies += 1;
    }

    pub fn end_apply(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.open_applies > 0);
        state.open_applies -= 1;
        if state.open_applies == 0 {
            self.cond.notify_all();
        }
    }

    /// Close the gate and drain open applies, then choose the commit seq.
    ///
    /// `applied_boundary` is evaluated once the drain completes. Returns
    /// `None`, with the gate reopened, when nothing was applied since the
    /// last commit. Otherwise the gate stays closed until
    /// [`commit_started`](Self::commit_started).
    pub fn commit_start(&self, applied_boundary: impl FnOnce() -> u64) -> Option<u64> {
        let mut state = self.state.lock();
        state.blocked = true;
        while state.open_applies > 0 {
            self.cond.wait(&mut state);
        }
        let seq = applied_boundary();
        if seq <= state.last_committed {
            state.blocked = false;
            self.cond.notify_all();
            return None;
        }
        Some(seq)
    }

    /// Reopen the gate; the media commit may now proceed alongside applies
    pub fn commit_started(&self) {
        self.state.lock().blocked = false;
        self.cond.notify_all();
    }

    /// Record a successful commit through `seq`
    pub fn commit_finish(&self, seq: u64) {
        let mut state = self.state.lock();
        state.last_committed = state.last_committed.max(seq);
    }

    pub fn last_committed(&self) -> u64 {
        self.state.lock().last_committed
    }

    pub fn open_applies(&self) -> usize {
        self.state.lock().open_applies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_commit_skipped_when_nothing_new() {
        let gate = ApplyGate::new(5);
        assert_eq!(gate.commit_start(|| 5), None);
        // Gate reopened: an apply can enter.
        gate.begin_apply();
        gate.end_apply();
    }

    #[test]
    fn test_commit_start_waits_for_open_apply() {
        let gate = Arc::new(ApplyGate::new(0));
        gate.begin_apply();

        let chosen = Arc::new(AtomicBool::new(false));
        let handle = {
            let gate = Arc::clone(&gate);
            let chosen = Arc::clone(&chosen);
            thread::spawn(move || {
                let seq = gate.commit_start(|| 7);
                chosen.store(true, Ordering::SeqCst);
                seq
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!chosen.load(Ordering::SeqCst));
        gate.end_apply();
        assert_eq!(handle.join().unwrap(), Some(7));

        gate.commit_started();
        gate.commit_finish(7);
        assert_eq!(gate.last_committed(), 7);
    }

    #[test]
    fn test_new_applies_blocked_until_commit_started() {
        let gate = Arc::new(ApplyGate::new(0));
        assert_eq!(gate.commit_start(|| 1), Some(1));

        let entered = Arc::new(AtomicBool::new(false));
        let handle = {
            let gate = Arc::clone(&gate);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                gate.begin_apply();
                entered.store(true, Ordering::SeqCst);
                gate.end_apply();
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!entered.load(Ordering::SeqCst));
        gate.commit_started();
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
        assert_eq!(gate.open_applies(), 0);
    }
}
