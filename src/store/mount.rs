//! Journal replay at mount
//!
//! Every durable journal record past the backend's committed seq is
//! decoded and re-applied in seq order, with the apply context marked
//! as replay so the backend tolerates effects that already reached it.
//! The result is committed and the journal trimmed before any new op is
//! accepted, so the first new op starts right after the last replayed.

use std::sync::Arc;
use std::time::Instant;

use super::errors::{StoreError, StoreResult};
use crate::backend::{decode_transactions, ApplyContext, Backend};
use crate::crash_point::{maybe_crash, points};
use crate::flusher::FlushQueue;
use crate::journal::JournalBackend;
use crate::observability::{Event, Logger, MetricsRegistry};

/// Sequencer name recorded for replayed applies
pub const REPLAY_SEQUENCER: &str = "replay";

/// What replay found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Committed seq read from the backend before replay
    pub committed_seq: u64,
    /// Records re-applied
    pub replayed: u64,
    /// Seq every op at or below which is now durable
    pub mounted_seq: u64,
}

/// Bring the backend up to date with the journal
pub fn replay_journal(
    backend: &dyn Backend,
    journal: Option<&Arc<dyn JournalBackend>>,
    metrics: &MetricsRegistry,
) -> StoreResult<ReplayOutcome> {
    let committed_seq = backend.committed_seq()?;
    let mut outcome = ReplayOutcome {
        committed_seq,
        replayed: 0,
        mounted_seq: committed_seq,
    };
    let Some(journal) = journal else {
        return Ok(outcome);
    };

    let started = Instant::now();
    Logger::info(Event::ReplayBegin, &[("committed_seq", &committed_seq)]);

    let flusher = FlushQueue::disabled();
    for entry in journal.replay(committed_seq)? {
        let transactions = decode_transactions(&entry.payload).map_err(|source| {
            StoreError::Decode {
                seq: entry.seq,
                source,
            }
        })?;
        let ctx = ApplyContext::new(entry.seq, REPLAY_SEQUENCER, true, &flusher);
        for tx in &transactions {
            match backend.apply(tx, &ctx) {
                Ok(()) => {}
                Err(e) if e.is_replay_tolerable() => {}
                Err(source) => {
                    return Err(StoreError::ApplyFailed {
                        seq: entry.seq,
                        source,
                    })
                }
            }
        }
        maybe_crash(points::REPLAY_AFTER_APPLY);
        metrics.increment_replayed();
        outcome.replayed += 1;
        outcome.mounted_seq = outcome.mounted_seq.max(entry.seq);
    }

    if outcome.mounted_seq > committed_seq {
        backend.commit_to_stable_media(outcome.mounted_seq)?;
        journal.trim(outcome.mounted_seq)?;
    }

    let elapsed_ms = started.elapsed().as_millis();
    Logger::info(
        Event::ReplayComplete,
        &[
            ("replayed", &outcome.replayed),
            ("mounted_seq", &outcome.mounted_seq),
            ("elapsed_ms", &elapsed_ms),
        ],
    );
    Ok(outcome)
}
