//! Ordered completion executor
//!
//! Completions are queued with the seq of the op they belong to and
//! fire strictly in seq order on a dedicated thread, whatever order they
//! were queued in. Every seq from `first_seq` on must be queued exactly
//! once (with `None` when the op has no callback), otherwise later
//! completions are held back forever.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::observability::{Event, Logger};

/// A one-shot completion callback
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

struct Holdback {
    next: u64,
    held: BTreeMap<u64, Option<Completion>>,
    sender: Option<Sender<(u64, Option<Completion>)>>,
}

struct Shared {
    holdback: Mutex<Holdback>,
    /// Queued but not yet run
    pending: Mutex<usize>,
    drained: Condvar,
}

/// One ordered completion stream
pub struct Finisher {
    name: String,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Finisher {
    /// Start a finisher whose first expected seq is `first_seq`
    pub fn start(name: impl Into<String>, first_seq: u64) -> std::io::Result<Self> {
        let name = name.into();
        let (sender, receiver) = unbounded();
        let shared = Arc::new(Shared {
            holdback: Mutex::new(Holdback {
                next: first_seq,
                held: BTreeMap::new(),
                sender: Some(sender),
            }),
            pending: Mutex::new(0),
            drained: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(&thread_name, &thread_shared, receiver))?;

        Ok(Self {
            name,
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue the completion for `seq`.
    ///
    /// It runs once every lower seq has been queued and run.
    pub fn queue(&self, seq: u64, completion: Option<Completion>) {
        *self.shared.pending.lock() += 1;

        let mut holdback = self.shared.holdback.lock();
        debug_assert!(seq >= holdback.next, "seq {} already released", seq);
        holdback.held.insert(seq, completion);

        loop {
            let next = holdback.next;
            let Some(completion) = holdback.held.remove(&next) else {
                break;
            };
            holdback.next += 1;
            if let Some(sender) = &holdback.sender {
                if sender.send((next, completion)).is_err() {
                    self.settle(1);
                }
            } else {
                self.settle(1);
            }
        }
    }

    fn settle(&self, count: usize) {
        let mut pending = self.shared.pending.lock();
        *pending -= count;
        if *pending == 0 {
            self.shared.drained.notify_all();
        }
    }

    /// Next seq the finisher is waiting for
    pub fn next_seq(&self) -> u64 {
        self.shared.holdback.lock().next
    }

    /// Completions queued but not yet run, including held-back ones
    pub fn pending(&self) -> usize {
        *self.shared.pending.lock()
    }

    /// Block until every queued completion has run
    pub fn wait_for_empty(&self) {
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.drained.wait(&mut pending);
        }
    }

    /// Run what is releasable, then stop the thread. Held-back
    /// completions are dropped.
    pub fn stop(&self) {
        let held = {
            let mut holdback = self.shared.holdback.lock();
            holdback.sender = None;
            std::mem::take(&mut holdback.held)
        };
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        if !held.is_empty() {
            self.settle(held.len());
        }
    }
}

impl Drop for Finisher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(name: &str, shared: &Shared, receiver: Receiver<(u64, Option<Completion>)>) {
    Logger::trace(Event::ThreadStart, &[("thread", &name)]);
    for (_seq, completion) in receiver.iter() {
        if let Some(completion) = completion {
            completion();
        }
        let mut pending = shared.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            shared.drained.notify_all();
        }
    }
    Logger::trace(Event::ThreadStop, &[("thread", &name)]);
}
