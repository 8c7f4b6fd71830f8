//! Thread heartbeats and the stall watchdog
//!
//! A thread arms its handle at the start of a turn and clears it at the
//! end. The watchdog checks every armed handle periodically: past the
//! warn bound it logs once per turn and bumps a counter, past the
//! suicide bound it calls the fatal hook.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::observability::{Event, Logger, MetricsRegistry};

/// Per-turn time bounds. Zero disables a bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTimeouts {
    pub warn: Duration,
    pub suicide: Duration,
}

impl TurnTimeouts {
    pub fn new(warn: Duration, suicide: Duration) -> Self {
        Self { warn, suicide }
    }
}

#[derive(Debug)]
struct Turn {
    started: Instant,
    timeouts: TurnTimeouts,
    warned: bool,
}

/// One thread's heartbeat slot
#[derive(Debug)]
pub struct HeartbeatHandle {
    name: String,
    turn: Mutex<Option<Turn>>,
}

impl HeartbeatHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start timing a turn
    pub fn arm(&self, timeouts: TurnTimeouts) {
        *self.turn.lock() = Some(Turn {
            started: Instant::now(),
            timeouts,
            warned: false,
        });
    }

    /// The turn finished
    pub fn clear(&self) {
        *self.turn.lock() = None;
    }

    pub fn is_armed(&self) -> bool {
        self.turn.lock().is_some()
    }
}

/// Outcome of one watchdog pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Threads past their warn bound
    pub unhealthy: Vec<String>,
    /// First thread found past its suicide bound, with its turn age
    pub suicide: Option<(String, Duration)>,
}

impl HeartbeatReport {
    pub fn is_healthy(&self) -> bool {
        self.unhealthy.is_empty() && self.suicide.is_none()
    }
}

/// Registry of every monitored thread
#[derive(Debug)]
pub struct HeartbeatMap {
    handles: Mutex<Vec<Arc<HeartbeatHandle>>>,
    metrics: Arc<MetricsRegistry>,
}

impl HeartbeatMap {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
            metrics,
        }
    }

    pub fn register(&self, name: impl Into<String>) -> Arc<HeartbeatHandle> {
        let handle = Arc::new(HeartbeatHandle {
            name: name.into(),
            turn: Mutex::new(None),
        });
        self.handles.lock().push(Arc::clone(&handle));
        handle
    }

    pub fn unregister(&self, handle: &Arc<HeartbeatHandle>) {
        self.handles.lock().retain(|h| !Arc::ptr_eq(h, handle));
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Check every armed turn against its bounds as of `now`
    pub fn check(&self, now: Instant) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();
        for handle in self.handles.lock().iter() {
            let mut turn = handle.turn.lock();
            let Some(turn) = turn.as_mut() else {
                continue;
            };
            let elapsed = now.saturating_duration_since(turn.started);

            if !turn.timeouts.suicide.is_zero() && elapsed > turn.timeouts.suicide {
                if report.suicide.is_none() {
                    report.suicide = Some((handle.name.clone(), elapsed));
                }
                continue;
            }
            if !turn.timeouts.warn.is_zero() && elapsed > turn.timeouts.warn {
                report.unhealthy.push(handle.name.clone());
                if !turn.warned {
                    turn.warned = true;
                    self.metrics.increment_heartbeat_warnings();
                    let elapsed_ms = elapsed.as_millis();
                    Logger::warn(
                        Event::HeartbeatTimeout,
                        &[("thread", &handle.name), ("elapsed_ms", &elapsed_ms)],
                    );
                }
            }
        }
        report
    }
}

/// Called with the stalled thread's name and turn age
pub type SuicideHook = Box<dyn Fn(&str, Duration) + Send + 'static>;

/// Background thread running [`HeartbeatMap::check`] periodically
pub struct Watchdog {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn start(
        map: Arc<HeartbeatMap>,
        interval: Duration,
        on_suicide: SuicideHook,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("heartbeat-watchdog".to_string())
            .spawn(move || {
                Logger::trace(Event::ThreadStart, &[("thread", &"heartbeat-watchdog")]);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Some((name, elapsed)) = map.check(Instant::now()).suicide {
                                on_suicide(&name, elapsed);
                            }
                        }
                        _ => break,
                    }
                }
                Logger::trace(Event::ThreadStop, &[("thread", &"heartbeat-watchdog")]);
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel and ends the loop.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
