//! Observable events
//!
//! Every log line names exactly one of these. Events are explicit
//! and typed so the set of things the store can report is closed.

use std::fmt;

/// Observable events in the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Mount begins
    StoreMount,
    /// Mount complete, accepting submissions
    StoreMounted,
    /// Shutdown initiated
    StoreShutdown,
    /// Shutdown complete
    StoreShutdownComplete,
    /// Configuration loaded
    ConfigLoaded,

    // Replay
    /// Journal replay begins
    ReplayBegin,
    /// Journal replay complete
    ReplayComplete,

    // Submission / apply
    /// Submitter blocked on the throttle
    ThrottleWait,
    /// Applying an op failed (FATAL)
    ApplyFailed,

    // Journal
    /// Journal batch made durable
    JournalAck,
    /// Journal trimmed
    JournalTrim,
    /// Journal write or ack failed (FATAL)
    JournalFailed,

    // Sync
    /// Sync commit begins
    SyncCommitBegin,
    /// Sync commit complete
    SyncCommitComplete,
    /// Sync commit skipped, nothing new applied
    SyncCommitSkipped,
    /// Sync commit failed
    SyncCommitFailed,

    // Flusher
    /// Write-back hint dropped because the queue is full
    FlusherHintDropped,
    /// Write-back request failed
    FlusherWriteBackFailed,

    // Threads
    /// Worker or background thread started
    ThreadStart,
    /// Worker or background thread exited
    ThreadStop,
    /// A thread turn ran past its warn timeout
    HeartbeatTimeout,
    /// A thread turn ran past its suicide timeout (FATAL)
    SuicideTimeout,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StoreMount => "STORE_MOUNT_BEGIN",
            Event::StoreMounted => "STORE_MOUNT_COMPLETE",
            Event::StoreShutdown => "STORE_SHUTDOWN_BEGIN",
            Event::StoreShutdownComplete => "STORE_SHUTDOWN_COMPLETE",
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::ReplayBegin => "JOURNAL_REPLAY_BEGIN",
            Event::ReplayComplete => "JOURNAL_REPLAY_COMPLETE",

            Event::ThrottleWait => "THROTTLE_WAIT",
            Event::ApplyFailed => "APPLY_FAILED",

            Event::JournalAck => "JOURNAL_ACK",
            Event::JournalTrim => "JOURNAL_TRIMMED",
            Event::JournalFailed => "JOURNAL_FAILED",

            Event::SyncCommitBegin => "SYNC_COMMIT_BEGIN",
            Event::SyncCommitComplete => "SYNC_COMMIT_COMPLETE",
            Event::SyncCommitSkipped => "SYNC_COMMIT_SKIPPED",
            Event::SyncCommitFailed => "SYNC_COMMIT_FAILED",

            Event::FlusherHintDropped => "FLUSHER_HINT_DROPPED",
            Event::FlusherWriteBackFailed => "FLUSHER_WRITEBACK_FAILED",

            Event::ThreadStart => "THREAD_START",
            Event::ThreadStop => "THREAD_STOP",
            Event::HeartbeatTimeout => "HEARTBEAT_TIMEOUT",
            Event::SuicideTimeout => "SUICIDE_TIMEOUT",
        }
    }

    /// Returns true if this event indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Event::ApplyFailed | Event::JournalFailed | Event::SuicideTimeout
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_strings_are_upper_snake() {
        let events = [
            Event::StoreMount,
            Event::StoreMounted,
            Event::StoreShutdown,
            Event::StoreShutdownComplete,
            Event::ConfigLoaded,
            Event::ReplayBegin,
            Event::ReplayComplete,
            Event::ThrottleWait,
            Event::ApplyFailed,
            Event::JournalAck,
            Event::JournalTrim,
            Event::JournalFailed,
            Event::SyncCommitBegin,
            Event::SyncCommitComplete,
            Event::SyncCommitSkipped,
            Event::SyncCommitFailed,
            Event::FlusherHintDropped,
            Event::FlusherWriteBackFailed,
            Event::ThreadStart,
            Event::ThreadStop,
            Event::HeartbeatTimeout,
            Event::SuicideTimeout,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_fatal_events() {
        assert!(Event::ApplyFailed.is_fatal());
        assert!(Event::JournalFailed.is_fatal());
        assert!(Event::SuicideTimeout.is_fatal());
        assert!(!Event::SyncCommitFailed.is_fatal());
        assert!(!Event::FlusherHintDropped.is_fatal());
    }
}
