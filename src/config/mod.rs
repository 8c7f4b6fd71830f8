//! Store configuration
//!
//! Loaded from a JSON file. Every key is optional; defaults follow the
//! long-standing FileStore tunables. A throttle maximum of 0 disables
//! that dimension.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::observability::Severity;
use crate::store::{StoreError, StoreResult};

/// How journaling is ordered relative to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Journal write completes before the op may be applied
    #[serde(alias = "write-ahead", alias = "write_ahead")]
    WriteAhead,
    /// Journal write and apply run concurrently
    Parallel,
    /// No journal; ops become durable when a sync commit covers them
    None,
}

impl JournalMode {
    /// Whether a journal backend is required
    pub fn is_journaled(self) -> bool {
        !matches!(self, JournalMode::None)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JournalMode::WriteAhead => "writeahead",
            JournalMode::Parallel => "parallel",
            JournalMode::None => "none",
        }
    }
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JournalMode {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "writeahead" | "write-ahead" | "write_ahead" => Ok(JournalMode::WriteAhead),
            "parallel" => Ok(JournalMode::Parallel),
            "none" => Ok(JournalMode::None),
            other => Err(StoreError::config(format!(
                "Invalid journal_mode: '{}'. Must be 'writeahead', 'parallel' or 'none'.",
                other
            ))),
        }
    }
}

/// Configuration for one store instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Max outstanding ops (mutation count) across all sequencers
    pub queue_max_ops: u64,
    /// Max outstanding payload bytes across all sequencers
    pub queue_max_bytes: u64,
    /// Extra op headroom while a sync commit is in progress
    pub queue_committing_max_ops: u64,
    /// Extra byte headroom while a sync commit is in progress
    pub queue_committing_max_bytes: u64,

    /// Apply worker threads
    pub op_threads: usize,
    /// A worker turn longer than this is logged as unhealthy
    pub op_thread_timeout_secs: f64,
    /// A worker turn longer than this terminates the process
    pub op_thread_suicide_timeout_secs: f64,
    /// A sync commit longer than this terminates the process
    pub commit_timeout_secs: f64,
    /// Watchdog check period
    pub heartbeat_interval_secs: f64,

    /// Sync at least this often
    pub max_sync_interval_secs: f64,
    /// Never sync more often than this unless forced
    pub min_sync_interval_secs: f64,

    pub journal_mode: JournalMode,
    /// On-disk journal file; when absent an in-memory journal is used
    pub journal_path: Option<PathBuf>,
    /// Store identity stamped into the journal header
    pub fsid: Option<Uuid>,
    /// Most records one journal write (one ack) may carry
    pub journal_max_write_entries: usize,
    /// Most payload bytes one journal write may carry; a single larger
    /// record still goes out alone
    pub journal_max_write_bytes: u64,

    /// Run the write-back flusher thread
    pub flusher: bool,
    /// Max write-back hints (open files) outstanding in the flusher
    pub flusher_max_fds: usize,

    /// Minimum log severity ("trace", "info", "warn", "error", "fatal")
    pub log_level: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            queue_max_ops: 500,
            queue_max_bytes: 100 << 20,
            queue_committing_max_ops: 500,
            queue_committing_max_bytes: 100 << 20,
            op_threads: 2,
            op_thread_timeout_secs: 60.0,
            op_thread_suicide_timeout_secs: 180.0,
            commit_timeout_secs: 600.0,
            heartbeat_interval_secs: 1.0,
            max_sync_interval_secs: 5.0,
            min_sync_interval_secs: 0.01,
            journal_mode: JournalMode::WriteAhead,
            journal_path: None,
            fsid: None,
            journal_max_write_entries: 100,
            journal_max_write_bytes: 10 << 20,
            flusher: true,
            flusher_max_fds: 512,
            log_level: "info".to_string(),
        }
    }
}

impl StoreConfig {
    /// Load and validate configuration from a JSON file
    pub fn load(path: &Path) -> StoreResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            StoreError::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json(content: &str) -> StoreResult<Self> {
        let config: StoreConfig = serde_json::from_str(content)
            .map_err(|e| StoreError::config(format!("Invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that cannot run safely
    pub fn validate(&self) -> StoreResult<()> {
        if self.op_threads == 0 {
            return Err(StoreError::config("op_threads must be > 0"));
        }

        for (name, value) in [
            ("op_thread_timeout_secs", self.op_thread_timeout_secs),
            ("op_thread_suicide_timeout_secs", self.op_thread_suicide_timeout_secs),
            ("commit_timeout_secs", self.commit_timeout_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("max_sync_interval_secs", self.max_sync_interval_secs),
            ("min_sync_interval_secs", self.min_sync_interval_secs),
        ] {
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(StoreError::config(format!(
                    "{} must be a non-negative number of seconds in range, got {}",
                    name, value
                )));
            }
        }

        if self.max_sync_interval_secs <= 0.0 {
            return Err(StoreError::config("max_sync_interval_secs must be > 0"));
        }
        if self.heartbeat_interval_secs <= 0.0 {
            return Err(StoreError::config("heartbeat_interval_secs must be > 0"));
        }
        if self.min_sync_interval_secs > self.max_sync_interval_secs {
            return Err(StoreError::config(
                "min_sync_interval_secs must not exceed max_sync_interval_secs",
            ));
        }
        if self.op_thread_suicide_timeout_secs > 0.0
            && self.op_thread_suicide_timeout_secs <= self.op_thread_timeout_secs
        {
            return Err(StoreError::config(
                "op_thread_suicide_timeout_secs must exceed op_thread_timeout_secs",
            ));
        }
        if self.journal_max_write_entries == 0 {
            return Err(StoreError::config("journal_max_write_entries must be > 0"));
        }
        if self.journal_max_write_bytes == 0 {
            return Err(StoreError::config("journal_max_write_bytes must be > 0"));
        }
        if self.flusher && self.flusher_max_fds == 0 {
            return Err(StoreError::config("flusher_max_fds must be > 0 when flusher is enabled"));
        }
        if self.journal_path.is_some() && !self.journal_mode.is_journaled() {
            return Err(StoreError::config("journal_path is set but journal_mode is 'none'"));
        }

        self.log_severity()?;
        Ok(())
    }

    /// Parsed `log_level`
    pub fn log_severity(&self) -> StoreResult<Severity> {
        self.log_level.parse::<Severity>().map_err(StoreError::config)
    }

    pub fn op_thread_timeout(&self) -> Duration {
        secs(self.op_thread_timeout_secs)
    }

    pub fn op_thread_suicide_timeout(&self) -> Duration {
        secs(self.op_thread_suicide_timeout_secs)
    }

    pub fn commit_timeout(&self) -> Duration {
        secs(self.commit_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        secs(self.heartbeat_interval_secs)
    }

    pub fn max_sync_interval(&self) -> Duration {
        secs(self.max_sync_interval_secs)
    }

    pub fn min_sync_interval(&self) -> Duration {
        secs(self.min_sync_interval_secs)
    }
}

/// Zero means "no bound". Out-of-range values saturate; `validate`
/// rejects them before mount.
fn secs(value: f64) -> Duration {
    if value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}
