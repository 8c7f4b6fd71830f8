//! Crash point injection for durability testing
//!
//! When `OBJSTORE_CRASH_POINT` names a point that execution reaches,
//! the process terminates via `std::process::abort()`: no cleanup, no
//! unwinding, no flushing of buffered state.
//!
//! ```bash
//! OBJSTORE_CRASH_POINT=journal_after_ack objstore bench --config store.json
//! ```

use std::sync::OnceLock;

static CRASH_POINT: OnceLock<Option<String>> = OnceLock::new();

#[inline]
fn configured_point() -> Option<&'static str> {
    CRASH_POINT
        .get_or_init(|| std::env::var("OBJSTORE_CRASH_POINT").ok())
        .as_deref()
}

/// Returns true if `OBJSTORE_CRASH_POINT` equals `name`.
#[inline]
pub fn crash_point_enabled(name: &str) -> bool {
    configured_point().map(|p| p == name).unwrap_or(false)
}

/// Abort the process if the named crash point is enabled.
#[inline]
pub fn maybe_crash(name: &str) {
    if crash_point_enabled(name) {
        eprintln!("[CRASH] Triggering crash at point: {}", name);
        std::process::abort();
    }
}

/// All defined crash point names
pub mod points {
    // Apply path
    pub const APPLY_BEFORE: &str = "apply_before";
    pub const APPLY_AFTER: &str = "apply_after";

    // Journal
    pub const JOURNAL_BEFORE_ACK: &str = "journal_before_ack";
    pub const JOURNAL_AFTER_ACK: &str = "journal_after_ack";
    pub const JOURNAL_BEFORE_TRIM: &str = "journal_before_trim";

    // Sync
    pub const SYNC_BEFORE_COMMIT: &str = "sync_before_commit";
    pub const SYNC_AFTER_COMMIT: &str = "sync_after_commit";

    // Mount
    pub const REPLAY_AFTER_APPLY: &str = "replay_after_apply";

    /// Get all crash point names
    pub fn all() -> &'static [&'static str] {
        &[
            APPLY_BEFORE,
            APPLY_AFTER,
            JOURNAL_BEFORE_ACK,
            JOURNAL_AFTER_ACK,
            JOURNAL_BEFORE_TRIM,
            SYNC_BEFORE_COMMIT,
            SYNC_AFTER_COMMIT,
            REPLAY_AFTER_APPLY,
        ]
    }
}
