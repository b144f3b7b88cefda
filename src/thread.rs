//! Named OS threads with timed joins, and a per-thread context stack.

use crate::{errors::Error, sync::CriticalSection};
use std::{
    any::Any,
    cell::RefCell,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

/// Join cap applied when a [`Thread`] is dropped without an explicit wait.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// A named OS thread created in two phases: [`new`](Thread::new) stores the
/// entry function, [`start`](Thread::start) spawns it.
///
/// [`wait`](Thread::wait) joins with a timeout. `std` offers no timed
/// join, so completion is tracked through a [`CriticalSection`] flag the
/// thread signals on exit (panicking included); once the flag is set the
/// real join is immediate. A thread that outlives its timeout is
/// abandoned, never force-terminated.
pub struct Thread {
    name: String,
    entry: Option<Box<dyn FnOnce() + Send + 'static>>,
    handle: Option<JoinHandle<()>>,
    finished: Arc<CriticalSection<bool>>,
}

impl Thread {
    pub fn new<F>(name: impl Into<String>, entry: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name: name.into(),
            entry: Some(Box::new(entry)),
            handle: None,
            finished: Arc::new(CriticalSection::new(false)),
        }
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawns the OS thread. Fails if already started or if the OS refuses
    /// the spawn.
    pub fn start(&mut self) -> Result<(), Error> {
        let Some(entry) = self.entry.take() else {
            return Err(Error::ConfigInvalid("thread already started"));
        };

        let finished = self.finished.clone();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                // Signals completion even when `entry` unwinds.
                let _signal = SignalOnExit(finished);
                entry();
            });

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(_) => Err(Error::ResourceExhausted),
        }
    }

    /// Waits for the thread to finish, at most `timeout` (`None` = forever).
    ///
    /// Returns `true` once the thread has finished and been joined. On
    /// `false` the thread is still running and is considered abandoned;
    /// calling `wait` again later is allowed.
    pub fn wait(&mut self, timeout: Option<Duration>) -> bool {
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.finished.enter();
        while !*guard {
            let remaining = match deadline {
                Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(remaining) => Some(remaining),
                    None => {
                        drop(guard);
                        self.handle = Some(handle);
                        return false;
                    }
                },
                None => None,
            };
            (guard, _) = self.finished.wait(guard, remaining);
        }
        drop(guard);

        // The thread has left its entry function; the join is immediate.
        // A panicked thread still counts as finished.
        let _ = handle.join();
        true
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.wait(Some(DEFAULT_JOIN_TIMEOUT));
    }
}

struct SignalOnExit(Arc<CriticalSection<bool>>);

impl Drop for SignalOnExit {
    fn drop(&mut self) {
        *self.0.enter() = true;
        self.0.notify_all();
    }
}

// CONTEXT STACK

/// Identity key for [`Context`] values.
///
/// Each call to [`ContextKey::new`] yields a distinct key; equality is
/// identity, never content. Create a key once (typically in a `OnceLock`)
/// and share it between the code that publishes a value and the code that
/// looks it up.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContextKey(usize);

impl ContextKey {
    pub fn new() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);
        ContextKey(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ContextKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Values stored on the context stack.
pub type ContextValue = Arc<dyn Any + Send + Sync>;

thread_local! {
    static FRAMES: RefCell<Vec<(ContextKey, ContextValue)>> = const { RefCell::new(Vec::new()) };
}

/// A per-thread stack of keyed values, giving filters and handlers a
/// task-local dictionary without a global registry.
///
/// [`find`](Context::find) walks from the innermost push outward, so a
/// nested push shadows an outer value for the same key until popped.
/// The stack is strictly thread-local; nothing crosses threads.
pub struct Context;

impl Context {
    /// Pushes a value for `key` on the calling thread's stack.
    pub fn push(key: ContextKey, value: ContextValue) {
        FRAMES.with(|frames| frames.borrow_mut().push((key, value)));
    }

    /// Removes and returns the innermost value, regardless of key.
    pub fn pop() -> Option<ContextValue> {
        FRAMES.with(|frames| frames.borrow_mut().pop().map(|(_, value)| value))
    }

    /// Finds the innermost value pushed for `key`.
    pub fn find(key: ContextKey) -> Option<ContextValue> {
        FRAMES.with(|frames| {
            frames
                .borrow()
                .iter()
                .rev()
                .find(|(frame_key, _)| *frame_key == key)
                .map(|(_, value)| value.clone())
        })
    }

    /// Drops every frame on the calling thread's stack.
    pub fn clear() {
        FRAMES.with(|frames| frames.borrow_mut().clear());
    }
}


#[cfg(test)]
mod context_tests {
    use super::*;

    #[test]
    fn push_find_pop_shadowing() {
        let key = ContextKey::new();

        assert!(Context::find(key).is_none());

        Context::push(key, Arc::new(1u32));
        Context::push(key, Arc::new(2u32));

        let inner = Context::find(key).unwrap();
        assert_eq!(inner.downcast_ref::<u32>(), Some(&2));

        Context::pop();
        let outer = Context::find(key).unwrap();
        assert_eq!(outer.downcast_ref::<u32>(), Some(&1));

        Context::pop();
        assert!(Context::find(key).is_none());
    }

    #[test]
    fn keys_are_distinct() {
        let first = ContextKey::new();
        let second = ContextKey::new();
        assert_ne!(first, second);

        Context::push(first, Arc::new("first"));
        assert!(Context::find(second).is_none());
        Context::clear();
    }

    #[test]
    fn clear_empties_the_stack() {
        let key = ContextKey::new();
        Context::push(key, Arc::new(1u32));
        Context::push(key, Arc::new(2u32));

        Context::clear();
        assert!(Context::find(key).is_none());
        assert!(Context::pop().is_none());
    }

    #[test]
    fn stack_is_thread_local() {
        let key = ContextKey::new();
        Context::push(key, Arc::new(7u32));

        std::thread::spawn(move || {
            assert!(Context::find(key).is_none());
        })
        .join()
        .unwrap();

        Context::clear();
    }
}
