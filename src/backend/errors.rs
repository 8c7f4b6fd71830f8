//! Storage backend errors
//!
//! Error codes:
//! - OBJ_STORAGE_NOT_FOUND
//! - OBJ_STORAGE_EXISTS
//! - OBJ_STORAGE_IO
//! - OBJ_STORAGE_INJECTED
//!
//! All are ERROR severity at this layer; the engine escalates an apply
//! failure to FATAL.

use std::io;

use thiserror::Error;

use crate::observability::Severity;

/// Result type for backend operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Object not found: {collection}/{object}")]
    ObjectNotFound { collection: String, object: String },

    #[error("Attribute not found: {0}")]
    AttrNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Injected fault: {0}")]
    Injected(String),
}

impl StorageError {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::CollectionNotFound(_)
            | StorageError::ObjectNotFound { .. }
            | StorageError::AttrNotFound(_) => "OBJ_STORAGE_NOT_FOUND",
            StorageError::AlreadyExists(_) => "OBJ_STORAGE_EXISTS",
            StorageError::Io(_) => "OBJ_STORAGE_IO",
            StorageError::Injected(_) => "OBJ_STORAGE_INJECTED",
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }

    /// Not-found and already-exists outcomes a replayed op may legitimately hit
    pub fn is_replay_tolerable(&self) -> bool {
        matches!(
            self,
            StorageError::CollectionNotFound(_)
                | StorageError::ObjectNotFound { .. }
                | StorageError::AttrNotFound(_)
                | StorageError::AlreadyExists(_)
        )
    }
}
