//! Single-threaded deadline queue shared by retransmission and delayed-ACK
//! timers.
//!
//! Grounded on `original_source/src/mac/SmartController.cc`'s
//! `timer_queue_` (a `TimerQueue<Clock>` keyed by the owning `SendWindow`/
//! `RecvWindow`) and on the cancellation scheme spelled out in `spec.md` §9:
//! a min-heap of `(deadline, entity, generation)` tuples where `cancel`
//! bumps the entity's generation so a fire that raced with a cancel is
//! ignored instead of synchronized against.
//!
//! Only one worker thread ever pops the heap; `run_in`/`cancel`/`running`
//! are called from other threads and only touch the shared `Mutex`-guarded
//! state.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::clock::{Clock, Seconds};

struct Entry<Id> {
    deadline: Seconds,
    id: Id,
    generation: u64,
}

impl<Id> PartialEq for Entry<Id> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl<Id> Eq for Entry<Id> {}
impl<Id> PartialOrd for Entry<Id> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<Id> Ord for Entry<Id> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse so BinaryHeap (a max-heap) pops the earliest deadline first.
        other
            .deadline
            .partial_cmp(&self.deadline)
            .unwrap_or(Ordering::Equal)
    }
}

struct Shared<Id: Eq + Hash> {
    heap: BinaryHeap<Entry<Id>>,
    /// Current valid generation per entity; entries whose generation is
    /// stale (doesn't match this map) are ignored when popped.
    generation: HashMap<Id, u64>,
    /// Whether an entity currently has a live (non-canceled, non-fired)
    /// deadline registered. Backs `running()`.
    armed: HashMap<Id, bool>,
    stop: bool,
}

/// A priority queue of deadline-triggered callbacks, one pending deadline
/// per entity.
///
/// `Id` identifies the owning entity (typically a `(NodeId, WindowKind)`
/// pair); `callback` is invoked with the fired entity's id from the timer
/// thread. Callbacks must be non-blocking: re-queue heavy work rather than
/// doing it inline, matching `spec.md` §4.1.
pub struct TimerQueue<Id: Eq + Hash + Clone + Send + 'static> {
    clock: Clock,
    shared: Arc<Mutex<Shared<Id>>>,
    cond: Arc<Condvar>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<Id: Eq + Hash + Clone + Send + 'static> TimerQueue<Id> {
    /// Construct a timer queue. The worker thread is not started until
    /// [`TimerQueue::start`] is called with the fire callback.
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            shared: Arc::new(Mutex::new(Shared {
                heap: BinaryHeap::new(),
                generation: HashMap::new(),
                armed: HashMap::new(),
                stop: false,
            })),
            cond: Arc::new(Condvar::new()),
            worker: Mutex::new(None),
        }
    }

    /// Start the timer thread, invoking `on_fire` for each entity whose
    /// deadline elapses and whose registration hasn't been canceled.
    pub fn start<F>(&self, on_fire: F)
    where
        F: Fn(Id) + Send + Sync + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let cond = Arc::clone(&self.cond);
        let clock = self.clock.clone();
        let handle = std::thread::Builder::new()
            .name("timer".to_string())
            .spawn(move || Self::run(shared, cond, clock, on_fire))
            .expect("failed to spawn timer thread");
        *self.worker.lock().unwrap() = Some(handle);
    }

    fn run<F>(shared: Arc<Mutex<Shared<Id>>>, cond: Arc<Condvar>, clock: Clock, on_fire: F)
    where
        F: Fn(Id) + Send + Sync + 'static,
    {
        loop {
            let mut due = Vec::new();
            {
                let mut guard = shared.lock().unwrap();
                loop {
                    if guard.stop {
                        return;
                    }
                    match guard.heap.peek() {
                        None => {
                            guard = cond.wait(guard).unwrap();
                        }
                        Some(top) => {
                            let now = clock.now();
                            if top.deadline <= now {
                                break;
                            }
                            let wait = Duration::from_secs_f64((top.deadline - now).max(0.0));
                            let (g, _) = cond.wait_timeout(guard, wait).unwrap();
                            guard = g;
                        }
                    }
                }
                let now = clock.now();
                while let Some(top) = guard.heap.peek() {
                    if top.deadline > now {
                        break;
                    }
                    let entry = guard.heap.pop().unwrap();
                    let current_gen = guard.generation.get(&entry.id).copied().unwrap_or(0);
                    if entry.generation == current_gen && guard.armed.get(&entry.id).copied().unwrap_or(false) {
                        guard.armed.insert(entry.id.clone(), false);
                        due.push(entry.id);
                    }
                }
            }
            for id in due {
                on_fire(id);
            }
        }
    }

    /// Arm (or re-arm) the timer for `id` to fire `delay` seconds from now.
    /// Idempotent: overwrites any existing deadline for `id`.
    pub fn run_in(&self, id: Id, delay: Seconds) {
        let mut guard = self.shared.lock().unwrap();
        let gen = guard.generation.entry(id.clone()).or_insert(0);
        *gen += 1;
        let generation = *gen;
        let deadline = self.clock.now() + delay;
        guard.armed.insert(id.clone(), true);
        guard.heap.push(Entry {
            deadline,
            id,
            generation,
        });
        self.cond.notify_all();
    }

    /// Cancel any pending deadline for `id`. A fire racing with this call is
    /// resolved by the generation check in the worker loop: if the fire
    /// already captured the stale generation, it silently no-ops.
    pub fn cancel(&self, id: &Id) {
        let mut guard = self.shared.lock().unwrap();
        if let Some(gen) = guard.generation.get_mut(id) {
            *gen += 1;
        }
        guard.armed.insert(id.clone(), false);
    }

    /// Whether `id` currently has a live (armed) deadline registered.
    pub fn running(&self, id: &Id) -> bool {
        let guard = self.shared.lock().unwrap();
        guard.armed.get(id).copied().unwrap_or(false)
    }

    /// Stop the worker thread and join it. Idempotent.
    pub fn stop(&self) {
        {
            let mut guard = self.shared.lock().unwrap();
            guard.stop = true;
        }
        self.cond.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl<Id: Eq + Hash + Clone + Send + 'static> Drop for TimerQueue<Id> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fires_after_delay() {
        let clock = Clock::new();
        let queue = TimerQueue::new(clock);
        let (tx, rx) = mpsc::channel();
        queue.start(move |id: u32| {
            let _ = tx.send(id);
        });
        queue.run_in(7, 0.02);
        let fired = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(fired, 7);
        queue.stop();
    }

    #[test]
    fn cancel_prevents_fire() {
        let clock = Clock::new();
        let queue = TimerQueue::new(clock);
        let (tx, rx) = mpsc::channel();
        queue.start(move |id: u32| {
            let _ = tx.send(id);
        });
        queue.run_in(1, 0.05);
        queue.cancel(&1);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        queue.stop();
    }

    #[test]
    fn run_in_is_idempotent_overwrite() {
        let clock = Clock::new();
        let queue = TimerQueue::new(clock);
        let (tx, rx) = mpsc::channel();
        queue.start(move |id: u32| {
            let _ = tx.send(id);
        });
        queue.run_in(3, 0.5);
        assert!(queue.running(&3));
        queue.run_in(3, 0.02);
        let fired = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(fired, 3);
        assert!(!queue.running(&3));
        queue.stop();
    }
}
