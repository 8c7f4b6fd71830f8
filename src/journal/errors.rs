//! Journal error types
//!
//! Error codes:
//! - OBJ_JOURNAL_APPEND_FAILED (ERROR severity)
//! - OBJ_JOURNAL_SYNC_FAILED (FATAL severity)
//! - OBJ_JOURNAL_CORRUPTION (FATAL severity)
//! - OBJ_JOURNAL_FSID_MISMATCH (FATAL severity)
//! - OBJ_JOURNAL_CLOSED (ERROR severity)

use std::fmt;
use std::io;

use crate::observability::Severity;

/// Journal error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalErrorCode {
    /// Writing a record failed
    ObjJournalAppendFailed,
    /// Making records durable failed
    ObjJournalSyncFailed,
    /// A complete record or the header failed validation
    ObjJournalCorruption,
    /// The journal belongs to another store
    ObjJournalFsidMismatch,
    /// The journal writer has stopped
    ObjJournalClosed,
}

impl JournalErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            JournalErrorCode::ObjJournalAppendFailed => "OBJ_JOURNAL_APPEND_FAILED",
            JournalErrorCode::ObjJournalSyncFailed => "OBJ_JOURNAL_SYNC_FAILED",
            JournalErrorCode::ObjJournalCorruption => "OBJ_JOURNAL_CORRUPTION",
            JournalErrorCode::ObjJournalFsidMismatch => "OBJ_JOURNAL_FSID_MISMATCH",
            JournalErrorCode::ObjJournalClosed => "OBJ_JOURNAL_CLOSED",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            JournalErrorCode::ObjJournalAppendFailed => Severity::Error,
            JournalErrorCode::ObjJournalSyncFailed => Severity::Fatal,
            JournalErrorCode::ObjJournalCorruption => Severity::Fatal,
            JournalErrorCode::ObjJournalFsidMismatch => Severity::Fatal,
            JournalErrorCode::ObjJournalClosed => Severity::Error,
        }
    }
}

impl fmt::Display for JournalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Journal error with context
#[derive(Debug)]
pub struct JournalError {
    code: JournalErrorCode,
    message: String,
    details: Option<String>,
    source: Option<io::Error>,
}

impl JournalError {
    pub fn append_failed(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: JournalErrorCode::ObjJournalAppendFailed,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Append refused without an underlying I/O error (e.g. injected)
    pub fn append_refused(message: impl Into<String>) -> Self {
        Self {
            code: JournalErrorCode::ObjJournalAppendFailed,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn sync_failed(message: impl Into<String>, source: Option<io::Error>) -> Self {
        Self {
            code: JournalErrorCode::ObjJournalSyncFailed,
            message: message.into(),
            details: None,
            source,
        }
    }

    pub fn corruption(message: impl Into<String>) -> Self {
        Self {
            code: JournalErrorCode::ObjJournalCorruption,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            code: JournalErrorCode::ObjJournalCorruption,
            message: reason.into(),
            details: Some(format!("byte_offset: {}", offset)),
            source: None,
        }
    }

    pub fn corruption_at_seq(seq: u64, reason: impl Into<String>) -> Self {
        Self {
            code: JournalErrorCode::ObjJournalCorruption,
            message: reason.into(),
            details: Some(format!("seq: {}", seq)),
            source: None,
        }
    }

    pub fn fsid_mismatch(expected: impl fmt::Display, found: impl fmt::Display) -> Self {
        Self {
            code: JournalErrorCode::ObjJournalFsidMismatch,
            message: "journal fsid does not match store".to_string(),
            details: Some(format!("expected: {}, found: {}", expected, found)),
            source: None,
        }
    }

    pub fn closed() -> Self {
        Self {
            code: JournalErrorCode::ObjJournalClosed,
            message: "journal writer is not running".to_string(),
            details: None,
            source: None,
        }
    }

    pub fn code(&self) -> JournalErrorCode {
        self.code
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        if let Some(ref source) = self.source {
            write!(f, ": {}", source)?;
        }
        Ok(())
    }
}

impl std::error::Error for JournalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for journal operations
pub type JournalResult<T> = Result<T, JournalError>;
