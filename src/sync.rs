//! Mutex + condition variable bundled as one critical section.

use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

/// A mutex-protected value with an attached condition variable.
///
/// Lock poisoning is absorbed: a worker that panicked while holding the
/// section must not wedge every other worker, so `enter` recovers the
/// inner value instead of propagating the poison.
///
/// [`wait`](CriticalSection::wait) may wake spuriously; callers re-check
/// their predicate in a loop.
#[derive(Debug, Default)]
pub struct CriticalSection<T> {
    state: Mutex<T>,
    signal: Condvar,
}

impl<T> CriticalSection<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(value),
            signal: Condvar::new(),
        }
    }

    /// Locks the section, blocking until it is available.
    #[inline]
    pub fn enter(&self) -> MutexGuard<'_, T> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Releases the lock and sleeps until notified or `timeout` expires;
    /// `None` waits forever.
    ///
    /// Returns the re-acquired guard and `true` iff the wakeup was caused
    /// by the timeout expiring, `false` iff it was a notification (or a
    /// spurious wakeup).
    pub fn wait<'a>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Option<Duration>,
    ) -> (MutexGuard<'a, T>, bool) {
        match timeout {
            Some(timeout) => {
                let (guard, result) = self
                    .signal
                    .wait_timeout(guard, timeout)
                    .unwrap_or_else(PoisonError::into_inner);
                (guard, result.timed_out())
            }
            None => {
                let guard = self
                    .signal
                    .wait(guard)
                    .unwrap_or_else(PoisonError::into_inner);
                (guard, false)
            }
        }
    }

    #[inline]
    pub fn notify_one(&self) {
        self.signal.notify_one();
    }

    #[inline]
    pub fn notify_all(&self) {
        self.signal.notify_all();
    }
}
