//! Time-scheduled bundle delivery
//!
//! A bundle whose timetag lies in the future is parked in a min-heap keyed
//! by `(due, sequence)` and handed back to the dispatcher by one background
//! worker once its due instant has passed. The worker sleeps on a condition
//! variable until the earliest deadline (bounded by
//! [`SchedulerConfig::max_wait`]) and is woken whenever a bundle is pushed.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use osclink_core::{Bundle, TimeTag};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::binding::panic_message;
use crate::config::SchedulerConfig;

/// Initial state of a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Execute now
    Ready,
    /// Park until the wall-clock instant
    Deferred(SystemTime),
}

/// Decide whether a bundle with `timetag` is due at `now`
pub fn decide(timetag: TimeTag, now: SystemTime) -> Decision {
    if timetag.is_immediate() {
        return Decision::Ready;
    }
    let due = timetag.to_system_time();
    if due <= now {
        Decision::Ready
    } else {
        Decision::Deferred(due)
    }
}

/// A bundle waiting in the heap
#[derive(Debug)]
struct ScheduledEntry {
    due: SystemTime,
    sequence: u64,
    bundle: Bundle,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.sequence == other.sequence
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap; reverse so the earliest (due, sequence) pops first
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct Queue {
    heap: BinaryHeap<ScheduledEntry>,
    next_sequence: u64,
    running: bool,
    /// Bumped on every start so a superseded worker exits
    generation: u64,
}

struct Shared {
    queue: Mutex<Queue>,
    wakeup: Condvar,
}

/// Min-heap of deferred bundles plus its background worker
pub struct Scheduler {
    config: SchedulerConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                queue: Mutex::new(Queue {
                    heap: BinaryHeap::new(),
                    next_sequence: 0,
                    running: false,
                    generation: 0,
                }),
                wakeup: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Park a bundle until `due`. Returns its insertion sequence.
    pub fn push(&self, due: SystemTime, bundle: Bundle) -> u64 {
        let sequence = {
            let mut queue = self.shared.queue.lock();
            let sequence = queue.next_sequence;
            queue.next_sequence += 1;
            queue.heap.push(ScheduledEntry {
                due,
                sequence,
                bundle,
            });
            sequence
        };
        self.shared.wakeup.notify_one();
        debug!("scheduled bundle #{} for {:?}", sequence, due);
        sequence
    }

    /// Number of bundles waiting
    pub fn len(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.shared.queue.lock().running
    }

    /// Start the worker if it is not running. `deliver` receives each due
    /// bundle and returns `false` once there is nobody left to deliver to.
    ///
    /// Returns `Ok(false)` when a worker was already running.
    pub fn start<F>(&self, deliver: F) -> std::io::Result<bool>
    where
        F: Fn(Bundle) -> bool + Send + 'static,
    {
        let mut worker = self.worker.lock();
        let generation = {
            let mut queue = self.shared.queue.lock();
            if queue.running {
                return Ok(false);
            }
            queue.running = true;
            queue.generation += 1;
            queue.generation
        };

        let shared = self.shared.clone();
        let max_wait = self.config.max_wait;
        let spawned = thread::Builder::new()
            .name(self.config.thread_name.clone())
            .spawn(move || run(shared, generation, max_wait, deliver));

        match spawned {
            Ok(handle) => {
                // a superseded worker is detached; it exits on its next check
                *worker = Some(handle);
                debug!("bundle scheduler started (generation {})", generation);
                Ok(true)
            }
            Err(e) => {
                self.shared.queue.lock().running = false;
                Err(e)
            }
        }
    }

    /// Stop the worker. Idempotent and non-blocking: a delivery already in
    /// progress finishes, but no further entry is popped once this returns.
    /// Parked bundles stay in the heap.
    pub fn stop(&self) {
        let was_running = {
            let mut queue = self.shared.queue.lock();
            std::mem::replace(&mut queue.running, false)
        };
        self.shared.wakeup.notify_all();
        let _ = self.worker.lock().take();
        if was_running {
            debug!("bundle scheduler stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F>(shared: Arc<Shared>, generation: u64, max_wait: Duration, deliver: F)
where
    F: Fn(Bundle) -> bool,
{
    loop {
        let entry = {
            let mut queue = shared.queue.lock();
            loop {
                if !queue.running || queue.generation != generation {
                    return;
                }
                let now = SystemTime::now();
                match queue.heap.peek().map(|entry| entry.due) {
                    Some(due) if due <= now => {
                        if let Some(entry) = queue.heap.pop() {
                            break entry;
                        }
                    }
                    Some(due) => {
                        let wait = due.duration_since(now).unwrap_or(Duration::ZERO);
                        shared.wakeup.wait_for(&mut queue, wait.min(max_wait));
                    }
                    None => {
                        shared.wakeup.wait_for(&mut queue, max_wait);
                    }
                }
            }
        };

        debug!("delivering scheduled bundle #{}", entry.sequence);
        match catch_unwind(AssertUnwindSafe(|| deliver(entry.bundle))) {
            Ok(true) => {}
            Ok(false) => {
                debug!("dispatcher gone, scheduler worker exiting");
                let mut queue = shared.queue.lock();
                if queue.generation == generation {
                    queue.running = false;
                }
                return;
            }
            Err(panic) => {
                error!(
                    "scheduled bundle #{} panicked: {}",
                    entry.sequence,
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}
