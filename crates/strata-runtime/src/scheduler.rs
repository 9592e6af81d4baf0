//! Clocks and the timer scheduler
//!
//! Stateful processors register wake-up times with [`Scheduler::notify_at`].
//! When the clock reaches an entry, the scheduler delivers a payload-free
//! `Timer` chunk to the registered processor. Delivery is at-least-once and
//! runs outside the scheduler's queue lock, so a processor may re-register
//! from inside its own timer callback.

use crate::chunk::EventChunk;
use crate::event::StreamEvent;
use crate::processor::Processor;
use parking_lot::Mutex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Source of "now" in epoch milliseconds
pub trait TimestampGenerator: Send + Sync {
    fn current_time(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl TimestampGenerator for SystemClock {
    fn current_time(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Externally driven clock for playback and tests
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self(AtomicI64::new(start))
    }

    pub fn set(&self, now: i64) {
        self.0.store(now, AtomicOrdering::SeqCst);
    }

    pub fn advance(&self, by: i64) -> i64 {
        self.0.fetch_add(by, AtomicOrdering::SeqCst) + by
    }
}

impl TimestampGenerator for ManualClock {
    fn current_time(&self) -> i64 {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

struct Entry {
    at: i64,
    seq: u64,
    target: Weak<dyn Processor>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

/// Timer scheduler shared by the processors of one app
pub struct Scheduler {
    clock: Arc<dyn TimestampGenerator>,
    queue: Mutex<BinaryHeap<Reverse<Entry>>>,
    seq: AtomicU64,
    stopped: AtomicBool,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn TimestampGenerator>) -> Self {
        Self {
            clock,
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn clock(&self) -> &Arc<dyn TimestampGenerator> {
        &self.clock
    }

    pub fn current_time(&self) -> i64 {
        self.clock.current_time()
    }

    /// Deliver a timer to `target` at or after `at`. Ignored after shutdown.
    pub fn notify_at(&self, at: i64, target: Weak<dyn Processor>) {
        if self.is_shutdown() {
            trace!("Scheduler shut down, dropping registration at {}", at);
            return;
        }
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.queue.lock().push(Reverse(Entry { at, seq, target }));
    }

    /// Earliest registered time, if any.
    pub fn next_due(&self) -> Option<i64> {
        self.queue.lock().peek().map(|Reverse(e)| e.at)
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Deliver every registration due at the current clock time. Returns the
    /// number of timers delivered to live processors. A failing processor is
    /// logged and does not stop delivery to the others.
    pub fn fire_due(&self) -> usize {
        let now = self.clock.current_time();
        let due = {
            let mut queue = self.queue.lock();
            let mut due = Vec::new();
            while queue.peek().is_some_and(|Reverse(e)| e.at <= now) {
                if let Some(Reverse(entry)) = queue.pop() {
                    due.push(entry);
                }
            }
            due
        };

        let mut delivered = 0;
        for entry in due {
            let Some(target) = entry.target.upgrade() else {
                continue;
            };
            trace!("Firing timer at {} into {}", entry.at, target.name());
            if let Err(e) = target.process(EventChunk::single(StreamEvent::timer(entry.at))) {
                error!("Timer delivery to {} failed: {}", target.name(), e);
            }
            delivered += 1;
        }
        delivered
    }

    /// Drive [`fire_due`](Self::fire_due) from a tokio task every `tick`.
    pub fn spawn(self: &Arc<Self>, tick: Duration) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            debug!("Scheduler starting with tick: {:?}", tick);
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                if scheduler.is_shutdown() {
                    debug!("Scheduler stopping");
                    break;
                }
                scheduler.fire_due();
            }
        })
    }

    /// Stop accepting registrations and drop queued ones.
    pub fn shutdown(&self) {
        self.stopped.store(true, AtomicOrdering::SeqCst);
        let dropped = {
            let mut queue = self.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        debug!("Scheduler shut down, {} pending timers dropped", dropped);
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(AtomicOrdering::SeqCst)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("stopped", &self.is_shutdown())
            .finish()
    }
}
