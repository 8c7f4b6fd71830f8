//! Sequencers: per-stream ordering
//!
//! Ops submitted on one sequencer apply, and complete, in seq order.
//! Ops on different sequencers are unordered with respect to each other
//! and may apply in parallel.

mod op;
mod op_sequencer;

pub use op::Op;
pub use op_sequencer::{ApplyGuard, OpSequencer};

use std::sync::Arc;
use std::time::Duration;

/// Caller-facing handle to one ordering domain.
///
/// Cheap to clone; clones share the same stream.
#[derive(Clone, Debug)]
pub struct Sequencer {
    inner: Arc<OpSequencer>,
}

impl Sequencer {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(OpSequencer::new(name)),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Block until everything submitted on this sequencer so far has
    /// applied and, when journaling, been acked by the journal
    pub fn flush(&self) {
        self.inner.flush();
    }

    /// [`flush`](Self::flush) with a deadline. Returns false on timeout.
    pub fn flush_timeout(&self, timeout: Duration) -> bool {
        self.inner.flush_timeout(timeout)
    }

    pub fn is_idle(&self) -> bool {
        self.inner.is_idle()
    }

    pub(crate) fn op_sequencer(&self) -> &Arc<OpSequencer> {
        &self.inner
    }
}

impl PartialEq for Sequencer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Sequencer {}
