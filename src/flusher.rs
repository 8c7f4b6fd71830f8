//! Best-effort write-back
//!
//! Backends hand the flusher `(file, offset, len)` ranges they have just
//! written. A dedicated thread asks the OS to start writing them back so
//! dirty pages do not pile up until the next sync commit.
//!
//! The queue is bounded by `flusher_max_fds`: each queued hint holds its
//! file open. A full queue drops the hint; nothing here ever blocks or
//! fails a foreground apply.

use std::fs::File;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::observability::{Event, Logger, MetricsRegistry};

/// One range to write back
#[derive(Debug, Clone)]
pub struct FlushHint {
    pub file: Arc<File>,
    pub offset: u64,
    pub len: u64,
}

/// Issues the write-back request for a hint
pub trait WriteBack: Send + Sync {
    fn write_back(&self, hint: &FlushHint) -> io::Result<()> {
        hint.file.sync_data()
    }
}

/// Write-back through `File::sync_data`
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncDataWriteBack;

impl WriteBack for SyncDataWriteBack {}

#[derive(Debug, Clone)]
struct QueueInner {
    sender: Sender<FlushHint>,
    metrics: Arc<MetricsRegistry>,
}

/// Producer side of the flusher, cloned into every apply context
#[derive(Debug, Clone)]
pub struct FlushQueue {
    inner: Option<QueueInner>,
}

impl FlushQueue {
    /// A queue that accepts nothing
    pub const fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Queue a write-back hint. Returns false when it was dropped.
    pub fn queue(&self, file: &Arc<File>, offset: u64, len: u64) -> bool {
        let Some(inner) = &self.inner else {
            return false;
        };
        let hint = FlushHint {
            file: Arc::clone(file),
            offset,
            len,
        };
        match inner.sender.try_send(hint) {
            Ok(()) => {
                inner.metrics.increment_flusher_queued();
                true
            }
            Err(TrySendError::Full(hint)) => {
                inner.metrics.increment_flusher_dropped();
                Logger::trace(
                    Event::FlusherHintDropped,
                    &[("offset", &hint.offset), ("len", &hint.len)],
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                inner.metrics.increment_flusher_dropped();
                false
            }
        }
    }
}

/// The write-back thread
pub struct Flusher {
    queue: FlushQueue,
    shutdown: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Flusher {
    pub fn start(
        max_fds: usize,
        writeback: Arc<dyn WriteBack>,
        metrics: Arc<MetricsRegistry>,
    ) -> io::Result<Self> {
        let (sender, hints) = bounded(max_fds.max(1));
        let (shutdown, shutdown_rx) = bounded(0);

        let thread_metrics = Arc::clone(&metrics);
        let handle = thread::Builder::new()
            .name("flusher".to_string())
            .spawn(move || run(hints, shutdown_rx, writeback, thread_metrics))?;

        Ok(Self {
            queue: FlushQueue {
                inner: Some(QueueInner { sender, metrics }),
            },
            shutdown: Mutex::new(Some(shutdown)),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn queue(&self) -> &FlushQueue {
        &self.queue
    }

    /// Write back whatever is queued, then stop the thread
    pub fn stop(&self) {
        self.shutdown.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    hints: Receiver<FlushHint>,
    shutdown: Receiver<()>,
    writeback: Arc<dyn WriteBack>,
    metrics: Arc<MetricsRegistry>,
) {
    Logger::trace(Event::ThreadStart, &[("thread", &"flusher")]);
    loop {
        select! {
            recv(hints) -> hint => match hint {
                Ok(hint) => write_back(writeback.as_ref(), &hint, &metrics),
                Err(_) => break,
            },
            recv(shutdown) -> _ => {
                for hint in hints.try_iter() {
                    write_back(writeback.as_ref(), &hint, &metrics);
                }
                break;
            }
        }
    }
    Logger::trace(Event::ThreadStop, &[("thread", &"flusher")]);
}

fn write_back(writeback: &dyn WriteBack, hint: &FlushHint, metrics: &MetricsRegistry) {
    match writeback.write_back(hint) {
        Ok(()) => metrics.increment_flusher_written(),
        Err(e) => {
            metrics.increment_flusher_failed();
            Logger::warn(
                Event::FlusherWriteBackFailed,
                &[("error", &e), ("offset", &hint.offset), ("len", &hint.len)],
            );
        }
    }
}
