//! A swappable monotonic time source.
//!
//! The timer service and collective-timeout worker measure durations
//! against this trait instead of calling `Instant::now()` directly, so
//! tests can fast-forward through multi-second phase timeouts (§4.4.3)
//! deterministically instead of sleeping in wall-clock time.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Blocks the calling thread until either `deadline` passes or `cvar`
    /// is notified, whichever comes first, then returns the reacquired
    /// guard. Implementors must wake callers promptly on notification even
    /// if `deadline` is far in the future. Spurious wakeups are allowed;
    /// callers are expected to re-check their condition in a loop.
    fn wait_until<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        cvar: &Condvar,
        deadline: Instant,
    ) -> MutexGuard<'a, T>;
}

/// The production clock: real monotonic time, real sleeping.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wait_until<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        cvar: &Condvar,
        deadline: Instant,
    ) -> MutexGuard<'a, T> {
        let now = Instant::now();
        if deadline <= now {
            return guard;
        }
        let (guard, _timeout) = cvar.wait_timeout(guard, deadline - now).unwrap();
        guard
    }
}

/// A manually-advanced clock for deterministic tests. `now()` returns a
/// fixed instant that only moves forward when `advance` is called; waits
/// return once the requested deadline has been passed by a call to
/// `advance`.
pub struct TestClock {
    state: Arc<(Mutex<Instant>, Condvar)>,
}

impl TestClock {
    #[must_use]
    pub fn new() -> Self {
        TestClock {
            state: Arc::new((Mutex::new(Instant::now()), Condvar::new())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let (lock, cvar) = &*self.state;
        let mut now = lock.lock().unwrap();
        *now += by;
        cvar.notify_all();
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for TestClock {
    fn clone(&self) -> Self {
        TestClock {
            state: Arc::clone(&self.state),
        }
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        *self.state.0.lock().unwrap()
    }

    fn wait_until<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        cvar: &Condvar,
        deadline: Instant,
    ) -> MutexGuard<'a, T> {
        // Wake on either the caller's own condvar (a real cancel) or on our
        // simulated clock advancing past the deadline; poll at a short
        // real-time interval since the two condvars are independent.
        let mut guard = guard;
        loop {
            if self.now() >= deadline {
                return guard;
            }
            let (next, timed_out) = cvar.wait_timeout(guard, Duration::from_millis(1)).unwrap();
            guard = next;
            if !timed_out.timed_out() {
                return guard;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_monotonically() {
        let clock = TestClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_secs(1));
        let t1 = clock.now();
        assert!(t1 > t0);
    }
}
