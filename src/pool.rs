//! Generic worker pool with per-worker FIFO queues and a record freelist.
//!
//! Not part of the HTTP hot path (each accept thread serves its own
//! connections serially); the pool is the general mechanism for running
//! queued work off-thread.

use crate::{errors::Error, sync::CriticalSection, thread::Thread};
use std::{collections::VecDeque, sync::Arc, time::Duration};

/// A queued unit of work.
pub type WorkFn = Box<dyn FnOnce() + Send + 'static>;

/// Per-thread startup callback. Implementations must call
/// [`Worker::run`] to enter the work loop.
pub type StartFn = Arc<dyn Fn(&Worker) + Send + Sync + 'static>;

/// Worker pool configuration.
///
/// Only static pools are currently supported: construction rejects
/// `count != max_count` and `allow_shrink == true`.
#[derive(Clone)]
pub struct PoolConfig {
    /// Number of workers created up front (default: `4`).
    pub count: usize,

    /// Upper bound on workers (default: `4`). Must equal `count`.
    pub max_count: usize,

    /// Whether idle workers may be retired (default: `false`).
    /// Must stay `false`.
    pub allow_shrink: bool,

    /// How long [`stop`](WorkerPool::stop) waits for each worker thread
    /// to finish its current work (default: `30 s`).
    pub worker_timeout: Duration,

    /// Optional per-thread startup hook; it is handed the worker and must
    /// call [`Worker::run`].
    pub on_start: Option<StartFn>,

    #[doc(hidden)]
    #[allow(dead_code)]
    pub _priv: (),
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            count: 4,
            max_count: 4,
            allow_shrink: false,
            worker_timeout: Duration::from_secs(30),
            on_start: None,

            _priv: (),
        }
    }
}

// A reusable shell for queued work. The freelist recycles the shell, not
// the closure, so submitting work on a warm worker allocates only the
// closure itself.
struct WorkRecord {
    task: Option<WorkFn>,
}

struct WorkerState {
    running: bool,
    queue: VecDeque<Box<WorkRecord>>,
    freelist: Vec<Box<WorkRecord>>,
}

/// One pool worker: a critical section guarding its run flag, pending-work
/// queue and freelist.
///
/// Invariants: a record is either in the queue or in the freelist, never
/// both; the worker that dequeues a record is the one that returns it to
/// its own freelist.
pub struct Worker {
    state: CriticalSection<WorkerState>,
}

impl Worker {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: CriticalSection::new(WorkerState {
                running: true,
                queue: VecDeque::new(),
                freelist: Vec::new(),
            }),
        })
    }

    /// The work loop. Returns when the worker is stopped and its queue is
    /// drained.
    pub fn run(&self) {
        loop {
            let mut guard = self.state.enter();
            let mut record = loop {
                if let Some(record) = guard.queue.pop_front() {
                    break record;
                }
                if !guard.running {
                    return;
                }
                (guard, _) = self.state.wait(guard, None);
            };
            drop(guard);

            if let Some(task) = record.task.take() {
                task();
            }

            self.state.enter().freelist.push(record);
        }
    }

    fn push(&self, task: WorkFn) {
        let mut guard = self.state.enter();
        let mut record = guard
            .freelist
            .pop()
            .unwrap_or_else(|| Box::new(WorkRecord { task: None }));
        record.task = Some(task);
        guard.queue.push_back(record);
        drop(guard);

        self.state.notify_one();
    }

    fn stop(&self) {
        self.state.enter().running = false;
        self.state.notify_one();
    }

    fn drain(&self) {
        let mut guard = self.state.enter();
        guard.queue.clear();
        guard.freelist.clear();
    }

    #[cfg(test)]
    fn freelist_len(&self) -> usize {
        self.state.enter().freelist.len()
    }
}

struct PoolWorker {
    worker: Arc<Worker>,
    thread: Option<Thread>,
}

/// A fixed set of workers with round-robin placement.
///
/// [`push`](WorkerPool::push) rotates the worker list (head to tail) under
/// the pool's critical section, then enqueues on the rotated worker: an
/// O(1) load spreader with no per-worker depth inspection. Ordering is
/// FIFO per worker; there is no ordering across workers.
pub struct WorkerPool {
    workers: CriticalSection<VecDeque<PoolWorker>>,
    worker_timeout: Duration,
    on_start: Option<StartFn>,
}

impl WorkerPool {
    /// Creates `config.count` workers. Threads are not started until
    /// [`start`](WorkerPool::start).
    pub fn new(config: PoolConfig) -> Result<Self, Error> {
        if config.count == 0 {
            return Err(Error::ConfigInvalid("worker pool needs at least one worker"));
        }
        if config.count != config.max_count {
            return Err(Error::ConfigInvalid("growing worker pools are not supported"));
        }
        if config.allow_shrink {
            return Err(Error::ConfigInvalid("shrinking worker pools are not supported"));
        }

        let workers = (0..config.count)
            .map(|_| PoolWorker {
                worker: Worker::new(),
                thread: None,
            })
            .collect();

        Ok(Self {
            workers: CriticalSection::new(workers),
            worker_timeout: config.worker_timeout,
            on_start: config.on_start,
        })
    }

    /// Launches every worker thread.
    ///
    /// If a spawn fails the error is returned and the workers started so
    /// far keep running; dropping the pool stops and drains them.
    pub fn start(&self) -> Result<(), Error> {
        let mut guard = self.workers.enter();
        for (index, entry) in guard.iter_mut().enumerate() {
            if entry.thread.is_some() {
                continue;
            }

            let worker = entry.worker.clone();
            let on_start = self.on_start.clone();
            let mut thread = Thread::new(format!("pool-worker-{index}"), move || match on_start {
                Some(on_start) => on_start(&worker),
                None => worker.run(),
            });
            thread.start()?;
            entry.thread = Some(thread);
        }
        Ok(())
    }

    /// Submits work: rotate the worker list, then enqueue on the rotated
    /// worker and wake it.
    pub fn push<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let worker = {
            let mut guard = self.workers.enter();
            if let Some(head) = guard.pop_front() {
                guard.push_back(head);
            }
            // Non-empty by construction.
            guard.back().map(|entry| entry.worker.clone())
        };

        if let Some(worker) = worker {
            worker.push(Box::new(task));
        }
    }

    /// Stops every worker, joins each thread within `worker_timeout`, and
    /// frees any work still queued.
    pub fn stop(&self) {
        let mut guard = self.workers.enter();
        for entry in guard.iter() {
            entry.worker.stop();
        }
        for entry in guard.iter_mut() {
            if let Some(mut thread) = entry.thread.take() {
                if !thread.wait(Some(self.worker_timeout)) {
                    log::warn!("worker thread {} did not stop in time", thread.name());
                }
            }
            entry.worker.drain();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}
