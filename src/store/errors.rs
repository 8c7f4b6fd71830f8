//! Engine errors
//!
//! Error codes:
//! - OBJ_STORE_CONFIG (ERROR)
//! - OBJ_STORE_SHUTTING_DOWN (ERROR)
//! - OBJ_STORE_APPLY_FAILED (FATAL)
//! - OBJ_STORE_JOURNAL (severity of the wrapped journal error)
//! - OBJ_STORE_COMMIT_FAILED (ERROR, the watermark does not move)
//! - OBJ_STORE_ENCODE (ERROR, transactions do not serialize)
//! - OBJ_STORE_DECODE (FATAL, a journal record does not decode)
//! - OBJ_STORE_STORAGE (ERROR)
//! - OBJ_STORE_IO (ERROR)

use std::io;

use thiserror::Error;

use crate::backend::StorageError;
use crate::journal::JournalError;
use crate::observability::Severity;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Store is shutting down")]
    ShuttingDown,

    #[error("Applying op {seq} failed: {source}")]
    ApplyFailed {
        seq: u64,
        #[source]
        source: StorageError,
    },

    #[error("Journal: {0}")]
    Journal(#[from] JournalError),

    #[error("Commit through op {committing_seq} failed: {reason}")]
    CommitFailed { committing_seq: u64, reason: String },

    #[error("Transactions do not serialize: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Journal record {seq} does not decode: {source}")]
    Decode {
        seq: u64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub fn config(message: impl Into<String>) -> Self {
        StoreError::Config(message.into())
    }

    pub fn commit_failed(committing_seq: u64, cause: &StorageError) -> Self {
        StoreError::CommitFailed {
            committing_seq,
            reason: cause.to_string(),
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Config(_) => "OBJ_STORE_CONFIG",
            StoreError::ShuttingDown => "OBJ_STORE_SHUTTING_DOWN",
            StoreError::ApplyFailed { .. } => "OBJ_STORE_APPLY_FAILED",
            StoreError::Journal(_) => "OBJ_STORE_JOURNAL",
            StoreError::CommitFailed { .. } => "OBJ_STORE_COMMIT_FAILED",
            StoreError::Encode(_) => "OBJ_STORE_ENCODE",
            StoreError::Decode { .. } => "OBJ_STORE_DECODE",
            StoreError::Storage(_) => "OBJ_STORE_STORAGE",
            StoreError::Io(_) => "OBJ_STORE_IO",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            StoreError::ApplyFailed { .. } | StoreError::Decode { .. } => Severity::Fatal,
            StoreError::Journal(e) => e.severity(),
            _ => Severity::Error,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_severity() {
        assert_eq!(StoreError::config("x").code(), "OBJ_STORE_CONFIG");
        assert_eq!(StoreError::ShuttingDown.code(), "OBJ_STORE_SHUTTING_DOWN");
        assert!(!StoreError::ShuttingDown.is_fatal());

        let apply = StoreError::ApplyFailed {
            seq: 4,
            source: StorageError::Injected("boom".into()),
        };
        assert_eq!(apply.code(), "OBJ_STORE_APPLY_FAILED");
        assert!(apply.is_fatal());
        assert!(apply.to_string().contains("op 4"));

        let commit = StoreError::commit_failed(9, &StorageError::Injected("disk".into()));
        assert_eq!(commit.severity(), Severity::Error);
        assert!(commit.to_string().contains("disk"));
    }

    #[test]
    fn test_journal_severity_passes_through() {
        let fatal: StoreError = JournalError::corruption("bad").into();
        assert!(fatal.is_fatal());
        let closed: StoreError = JournalError::closed().into();
        assert!(!closed.is_fatal());
    }
}
