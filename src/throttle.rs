//! Admission throttle
//!
//! Bounds the total outstanding (ops, bytes) across all sequencers.
//! `reserve` blocks until the cost fits, `release` returns capacity and
//! wakes every waiter to re-check its own condition.
//!
//! A maximum of 0 disables that dimension. While a sync commit is in
//! progress the committing headroom is added on top of the base maxima.
//! An op larger than the maxima is admitted only when nothing else is
//! outstanding, so it never deadlocks and never shares the window.

use std::ops::{Add, AddAssign};

use parking_lot::{Condvar, Mutex};

use crate::config::StoreConfig;

/// Throttle cost of one op
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cost {
    pub ops: u64,
    pub bytes: u64,
}

impl Cost {
    pub const ZERO: Cost = Cost { ops: 0, bytes: 0 };

    pub fn new(ops: u64, bytes: u64) -> Self {
        Self { ops, bytes }
    }

    pub fn is_zero(&self) -> bool {
        self.ops == 0 && self.bytes == 0
    }
}

impl Add for Cost {
    type Output = Cost;

    fn add(self, rhs: Cost) -> Cost {
        Cost {
            ops: self.ops + rhs.ops,
            bytes: self.bytes + rhs.bytes,
        }
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, rhs: Cost) {
        *self = *self + rhs;
    }
}

/// Configured maxima
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleLimits {
    pub max_ops: u64,
    pub max_bytes: u64,
    pub committing_max_ops: u64,
    pub committing_max_bytes: u64,
}

impl ThrottleLimits {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            max_ops: config.queue_max_ops,
            max_bytes: config.queue_max_bytes,
            committing_max_ops: config.queue_committing_max_ops,
            committing_max_bytes: config.queue_committing_max_bytes,
        }
    }

    pub fn unlimited() -> Self {
        Self {
            max_ops: 0,
            max_bytes: 0,
            committing_max_ops: 0,
            committing_max_bytes: 0,
        }
    }
}

#[derive(Debug)]
struct ThrottleState {
    limits: ThrottleLimits,
    outstanding: Cost,
    committing: bool,
}

impl ThrottleState {
    fn effective_max(&self) -> Cost {
        let mut max = Cost::new(self.limits.max_ops, self.limits.max_bytes);
        if self.committing {
            if max.ops > 0 {
                max.ops += self.limits.committing_max_ops;
            }
            if max.bytes > 0 {
                max.bytes += self.limits.committing_max_bytes;
            }
        }
        max
    }

    fn must_wait(&self, cost: Cost) -> bool {
        if self.outstanding.is_zero() {
            return false;
        }
        let max = self.effective_max();
        (max.ops > 0 && self.outstanding.ops + cost.ops > max.ops)
            || (max.bytes > 0 && self.outstanding.bytes + cost.bytes > max.bytes)
    }
}

/// Shared admission throttle
#[derive(Debug)]
pub struct Throttle {
    state: Mutex<ThrottleState>,
    cond: Condvar,
}

impl Throttle {
    pub fn new(limits: ThrottleLimits) -> Self {
        Self {
            state: Mutex::new(ThrottleState {
                limits,
                outstanding: Cost::ZERO,
                committing: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Block until `cost` fits, then take it.
    ///
    /// Returns true if the caller had to wait.
    pub fn reserve(&self, cost: Cost) -> bool {
        let mut state = self.state.lock();
        let mut waited = false;
        while state.must_wait(cost) {
            waited = true;
            self.cond.wait(&mut state);
        }
        state.outstanding += cost;
        waited
    }

    /// Take `cost` only if it fits right now
    pub fn try_reserve(&self, cost: Cost) -> bool {
        let mut state = self.state.lock();
        if state.must_wait(cost) {
            return false;
        }
        state.outstanding += cost;
        true
    }

    /// Return capacity and wake all waiters
    pub fn release(&self, cost: Cost) {
        let mut state = self.state.lock();
        debug_assert!(state.outstanding.ops >= cost.ops && state.outstanding.bytes >= cost.bytes);
        state.outstanding.ops = state.outstanding.ops.saturating_sub(cost.ops);
        state.outstanding.bytes = state.outstanding.bytes.saturating_sub(cost.bytes);
        drop(state);
        self.cond.notify_all();
    }

    /// Raise or lower the maxima by the committing headroom
    pub fn set_committing(&self, committing: bool) {
        self.state.lock().committing = committing;
        self.cond.notify_all();
    }

    pub fn outstanding(&self) -> Cost {
        self.state.lock().outstanding
    }

    /// Maxima currently in force
    pub fn current_max(&self) -> Cost {
        self.state.lock().effective_max()
    }

    pub fn is_committing(&self) -> bool {
        self.state.lock().committing
    }
}
