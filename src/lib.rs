//! objstore - transaction sequencing and journaling engine for an
//! object store
//!
//! Callers submit ops (lists of transactions) on sequencers. Each op is
//! throttled, given a global seq, journaled, applied by a worker pool in
//! per-sequencer order, and reported applied and durable through
//! completions that fire in seq order. A sync thread periodically
//! commits the backend and trims the journal.
//!
//! See [`store::ObjectStore`] for the engine entry point.

pub mod backend;
pub mod cli;
pub mod commit;
pub mod config;
pub mod crash_point;
pub mod dispatch;
pub mod durability;
pub mod finisher;
pub mod flusher;
pub mod journal;
pub mod observability;
pub mod sequencer;
pub mod store;
pub mod throttle;

pub use backend::{MemStore, Transaction};
pub use config::{JournalMode, StoreConfig};
pub use sequencer::Sequencer;
pub use store::{ObjectStore, StoreError, StoreResult};
