//! The generic one-shot timer facility (§4.1). Used by the transition
//! engine to arm and cancel per-client deadlines.
//!
//! A single worker thread owns a min-heap of pending deadlines guarded by a
//! mutex/condvar pair; `arm` and `cancel` only ever touch that shared
//! state, so callbacks always run on the worker thread, never on the
//! caller's stack.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};

/// Handle returned by `arm`. Cancellation is idempotent: cancelling an
/// already-fired or already-cancelled handle is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Clone, Copy)]
struct ScheduledAt {
    deadline: Instant,
    id: u64,
}

impl PartialEq for ScheduledAt {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for ScheduledAt {}
impl PartialOrd for ScheduledAt {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledAt {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline).then(self.id.cmp(&other.id))
    }
}

struct Inner {
    heap: BinaryHeap<Reverse<ScheduledAt>>,
    pending: HashMap<u64, Callback>,
    next_id: u64,
    shutdown: bool,
}

/// Schedules one-shot callbacks at a future monotonic instant.
pub struct TimerService<C: Clock + Clone = SystemClock> {
    shared: Arc<(Mutex<Inner>, Condvar)>,
    clock: C,
    worker: Option<JoinHandle<()>>,
}

impl TimerService<SystemClock> {
    #[must_use]
    pub fn new() -> Self {
        TimerService::with_clock(SystemClock)
    }
}

impl Default for TimerService<SystemClock> {
    fn default() -> Self {
        TimerService::new()
    }
}

impl<C: Clock + Clone> TimerService<C> {
    pub fn with_clock(clock: C) -> Self {
        let shared = Arc::new((
            Mutex::new(Inner {
                heap: BinaryHeap::new(),
                pending: HashMap::new(),
                next_id: 0,
                shutdown: false,
            }),
            Condvar::new(),
        ));

        let worker = {
            let shared = Arc::clone(&shared);
            let clock = clock.clone();
            std::thread::Builder::new()
                .name("nsm-timer".into())
                .spawn(move || Self::worker_loop(&shared, &clock))
                .expect("failed to spawn timer worker thread")
        };

        TimerService {
            shared,
            clock,
            worker: Some(worker),
        }
    }

    /// Arms a timer that fires `duration` from now. `duration == 0` still
    /// defers the callback to the worker thread rather than running it
    /// synchronously.
    pub fn arm<F>(&self, duration: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let (lock, cvar) = &*self.shared;
        let mut inner = lock.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        let deadline = self.clock.now() + duration;
        inner.pending.insert(id, Box::new(callback));
        inner.heap.push(Reverse(ScheduledAt { deadline, id }));
        cvar.notify_all();
        TimerHandle(id)
    }

    /// Idempotent. If the callback has already begun executing, this does
    /// not abort it; it only prevents a not-yet-fired callback from
    /// running.
    pub fn cancel(&self, handle: TimerHandle) {
        let (lock, _cvar) = &*self.shared;
        let mut inner = lock.lock().unwrap();
        inner.pending.remove(&handle.0);
    }

    fn worker_loop(shared: &Arc<(Mutex<Inner>, Condvar)>, clock: &C) {
        let (lock, cvar) = &**shared;
        let mut guard = lock.lock().unwrap();
        loop {
            if guard.shutdown {
                return;
            }

            let next = guard.heap.peek().map(|Reverse(s)| *s);
            match next {
                None => {
                    guard = cvar.wait(guard).unwrap();
                }
                Some(scheduled) => {
                    let now = clock.now();
                    if now >= scheduled.deadline {
                        guard.heap.pop();
                        let callback = guard.pending.remove(&scheduled.id);
                        drop(guard);
                        if let Some(callback) = callback {
                            callback();
                        }
                        guard = lock.lock().unwrap();
                    } else {
                        guard = clock.wait_until(guard, cvar, scheduled.deadline);
                    }
                }
            }
        }
    }
}

impl<C: Clock + Clone> Drop for TimerService<C> {
    fn drop(&mut self) {
        {
            let (lock, cvar) = &*self.shared;
            let mut inner = lock.lock().unwrap();
            inner.shutdown = true;
            cvar.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use std::sync::mpsc;

    #[test]
    fn fires_after_duration() {
        let timers = TimerService::new();
        let (tx, rx) = mpsc::channel();
        timers.arm(Duration::from_millis(5), move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(1))
            .expect("timer should have fired");
    }

    #[test]
    fn cancel_prevents_firing() {
        let timers = TimerService::new();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = timers.arm(Duration::from_millis(50), move || tx.send(()).unwrap());
        timers.cancel(handle);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn cancel_is_idempotent() {
        let timers = TimerService::new();
        let handle = timers.arm(Duration::from_secs(10), || {});
        timers.cancel(handle);
        timers.cancel(handle);
    }

    #[test]
    fn fires_in_deadline_order_under_test_clock() {
        let clock = TestClock::new();
        let timers = TimerService::with_clock(clock.clone());
        let (tx, rx) = mpsc::channel();

        let tx1 = tx.clone();
        timers.arm(Duration::from_secs(2), move || tx1.send(2).unwrap());
        let tx2 = tx.clone();
        timers.arm(Duration::from_secs(1), move || tx2.send(1).unwrap());

        clock.advance(Duration::from_secs(1));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), 2);
    }
}
