//! Dispatch of ready work to a fixed worker pool
//!
//! A [`WorkSource`] hands out items and knows how to process one. The
//! generic [`WorkerPool`] drains any source; the store plugs in a source
//! whose items are ready sequencers, one head op per turn.

mod heartbeat;
mod pool;

pub use heartbeat::{
    HeartbeatHandle, HeartbeatMap, HeartbeatReport, SuicideHook, TurnTimeouts, Watchdog,
};
pub use pool::{PoolSignal, WorkerPool};

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Work consumed by a [`WorkerPool`]
pub trait WorkSource: Send + Sync + 'static {
    type Item: Send;

    /// Take the next item without blocking
    fn try_dequeue(&self) -> Option<Self::Item>;

    fn is_empty(&self) -> bool;

    /// Do one bounded unit of work on `item`
    fn process_one(&self, item: Self::Item, heartbeat: &HeartbeatHandle);
}

/// FIFO of ready items that wakes a pool on push
#[derive(Debug)]
pub struct DispatchQueue<T> {
    ready: Mutex<VecDeque<T>>,
    signal: Arc<PoolSignal>,
}

impl<T> DispatchQueue<T> {
    pub fn new(signal: Arc<PoolSignal>) -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            signal,
        }
    }

    pub fn push(&self, item: T) {
        self.ready.lock().push_back(item);
        self.signal.notify_one();
    }

    pub fn pop(&self) -> Option<T> {
        self.ready.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.ready.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.lock().is_empty()
    }
}
