//! The unit of sequenced work

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

use crate::backend::Transaction;
use crate::finisher::Completion;
use crate::throttle::Cost;

/// One throttled, sequenced batch of transactions
pub struct Op {
    seq: u64,
    transactions: Vec<Transaction>,
    cost: Cost,
    on_applied: Mutex<Option<Completion>>,
    on_durable: Mutex<Option<Completion>>,
    /// Parts (apply, journal) still to complete before retirement
    remaining: AtomicU8,
    submitted_at: Instant,
}

impl Op {
    /// Build an op. `journaled` adds the journal ack as a second part
    /// that must complete before the op retires.
    pub fn new(
        seq: u64,
        transactions: Vec<Transaction>,
        on_applied: Option<Completion>,
        on_durable: Option<Completion>,
        journaled: bool,
    ) -> Self {
        let cost = Self::cost_of(&transactions);
        Self {
            seq,
            transactions,
            cost,
            on_applied: Mutex::new(on_applied),
            on_durable: Mutex::new(on_durable),
            remaining: AtomicU8::new(if journaled { 2 } else { 1 }),
            submitted_at: Instant::now(),
        }
    }

    /// Throttle cost: mutation count and payload bytes over all transactions
    pub fn cost_of(transactions: &[Transaction]) -> Cost {
        transactions.iter().fold(Cost::ZERO, |acc, tx| {
            acc + Cost::new(tx.num_ops(), tx.num_bytes())
        })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn cost(&self) -> Cost {
        self.cost
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Take the apply completion; `None` after the first call
    pub fn take_on_applied(&self) -> Option<Completion> {
        self.on_applied.lock().take()
    }

    /// Take the durability completion; `None` after the first call
    pub fn take_on_durable(&self) -> Option<Completion> {
        self.on_durable.lock().take()
    }

    /// Mark one part done. Returns true for the last part.
    pub fn complete_part(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

impl std::fmt::Debug for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Op")
            .field("seq", &self.seq)
            .field("transactions", &self.transactions.len())
            .field("cost", &self.cost)
            .finish()
    }
}
