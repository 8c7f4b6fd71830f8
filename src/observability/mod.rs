//! Observability for the object store
//!
//! - Structured logging (JSON lines, typed events)
//! - Monotonic counters
//!
//! Observability is read-only: nothing here feeds back into
//! sequencing, throttling or durability decisions.
//!
//! ```ignore
//! use objstore::observability::{Event, Logger};
//!
//! let seq = 17u64;
//! Logger::info(Event::SyncCommitComplete, &[("committed_seq", &seq)]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Field, Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log a lifecycle event at the severity its kind implies
pub fn log_event(event: Event, fields: &[Field<'_>]) {
    let severity = if event.is_fatal() {
        Severity::Fatal
    } else {
        Severity::Info
    };
    Logger::log(severity, event, fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_does_not_panic() {
        log_event(Event::StoreMount, &[]);
        let name = "op-worker-0";
        log_event(Event::ThreadStart, &[("thread", &name)]);
    }
}
