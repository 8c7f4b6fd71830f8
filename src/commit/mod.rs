//! Sync commits
//!
//! The sync thread is the only path by which the backing store becomes
//! durable on its own, independent of the journal. Each successful
//! commit advances the committed seq, lets the journal be trimmed, and
//! releases durability completions of ops that were never journaled.

mod coordinator;

pub use coordinator::{SyncCallback, SyncContext, SyncCoordinator, SyncSettings, SyncTrigger};
