//! Generic worker pool over a [`WorkSource`]

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::heartbeat::{HeartbeatMap, TurnTimeouts};
use super::WorkSource;
use crate::observability::{Event, Logger};

/// Idle workers re-check their source at least this often
const IDLE_RECHECK: Duration = Duration::from_millis(500);

/// Wakeup channel shared by a pool and its producers.
///
/// Workers look for work while holding the signal lock, and producers
/// notify under the same lock, so a push between a worker's empty
/// check and its wait cannot be missed.
#[derive(Debug, Default)]
pub struct PoolSignal {
    stopping: Mutex<bool>,
    cond: Condvar,
}

impl PoolSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify_one(&self) {
        let _guard = self.stopping.lock();
        self.cond.notify_one();
    }

    pub fn notify_all(&self) {
        let _guard = self.stopping.lock();
        self.cond.notify_all();
    }

    /// Ask workers to exit once their source is empty
    pub fn stop(&self) {
        *self.stopping.lock() = true;
        self.cond.notify_all();
    }

    pub fn is_stopping(&self) -> bool {
        *self.stopping.lock()
    }
}

/// Fixed set of threads draining one work source
pub struct WorkerPool {
    name: String,
    signal: Arc<PoolSignal>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers named `{name}-{i}`.
    ///
    /// Each worker turn is timed against `timeouts` through its
    /// heartbeat.
    pub fn start<S: WorkSource>(
        name: &str,
        threads: usize,
        source: Arc<S>,
        signal: Arc<PoolSignal>,
        heartbeats: &Arc<HeartbeatMap>,
        timeouts: TurnTimeouts,
    ) -> std::io::Result<Self> {
        let mut handles = Vec::with_capacity(threads);
        for i in 0..threads {
            let thread_name = format!("{}-{}", name, i);
            let source = Arc::clone(&source);
            let signal = Arc::clone(&signal);
            let heartbeats = Arc::clone(heartbeats);
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(&thread_name, &*source, &signal, &heartbeats, timeouts))?;
            handles.push(handle);
        }
        Ok(Self {
            name: name.to_string(),
            signal,
            handles,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Let workers drain the source, then join them
    pub fn stop(&mut self) {
        self.signal.stop();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<S: WorkSource>(
    name: &str,
    source: &S,
    signal: &PoolSignal,
    heartbeats: &HeartbeatMap,
    timeouts: TurnTimeouts,
) {
    Logger::trace(Event::ThreadStart, &[("thread", &name)]);
    let heartbeat = heartbeats.register(name);

    let mut stopping = signal.stopping.lock();
    loop {
        if let Some(item) = source.try_dequeue() {
            MutexGuard::unlocked(&mut stopping, || {
                heartbeat.arm(timeouts);
                source.process_one(item, &heartbeat);
                heartbeat.clear();
            });
            continue;
        }
        if *stopping && source.is_empty() {
            break;
        }
        signal.cond.wait_for(&mut stopping, IDLE_RECHECK);
    }
    drop(stopping);

    heartbeats.unregister(&heartbeat);
    Logger::trace(Event::ThreadStop, &[("thread", &name)]);
}
