//! Pool management and lifecycle.

use std::fmt;
use std::mem;
use std::num::NonZero;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender, bounded, select};
use parking_lot::Mutex;
use tracing::debug;

use crate::{Error, Job, Result, WorkerCore, worker_loop};

/// A fixed number of worker threads executing jobs from a bounded queue.
///
/// Jobs are plain closures. They run in no particular order relative to each other and nothing
/// reports back when a job completes - jobs that produce results are expected to send them
/// wherever they are needed themselves.
///
/// The pool does nothing until [`start()`][Self::start] spawns the workers. Jobs pushed before
/// that are queued, up to the queue capacity.
///
/// # Lifetime
///
/// When the pool is closed (explicitly via [`close()`][Self::close] or by dropping it):
/// 1. New jobs are rejected with [`Error::Closed`], including pushes that are blocked waiting
///    for queue space.
/// 2. All worker threads are signaled to shut down.
/// 3. The close blocks until all currently-executing jobs complete.
/// 4. Any queued jobs that have not started are abandoned.
///
/// # Panics
///
/// A job that panics does not take its worker down. The panic is logged and the worker moves
/// on to the next job.
///
/// # Example
///
/// ```rust
/// use std::sync::mpsc;
///
/// use job_pool::JobPool;
/// use new_zealand::nz;
///
/// let pool = JobPool::new(nz!(2), nz!(16));
/// pool.start().unwrap();
///
/// let (tx, rx) = mpsc::channel();
/// pool.push(move || tx.send(42).unwrap()).unwrap();
///
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
pub struct JobPool {
    worker_count: NonZero<usize>,
    queue_capacity: NonZero<usize>,

    /// `None` once the pool is closed.
    job_sender: Mutex<Option<Sender<Job>>>,
    job_receiver: Receiver<Job>,

    /// Never used to send anything. Dropping the sender wakes everyone waiting on a receiver.
    close_sender: Mutex<Option<Sender<()>>>,
    close_receiver: Receiver<()>,

    started: AtomicBool,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobPool {
    /// Creates a pool that will run `worker_count` workers fed from a queue holding up to
    /// `queue_capacity` pending jobs.
    ///
    /// No threads are spawned until [`start()`][Self::start] is called.
    #[must_use]
    pub fn new(worker_count: NonZero<usize>, queue_capacity: NonZero<usize>) -> Self {
        let (job_sender, job_receiver) = bounded(queue_capacity.get());
        let (close_sender, close_receiver) = bounded(0);

        Self {
            worker_count,
            queue_capacity,
            job_sender: Mutex::new(Some(job_sender)),
            job_receiver,
            close_sender: Mutex::new(Some(close_sender)),
            close_receiver,
            started: AtomicBool::new(false),
            worker_handles: Mutex::new(Vec::with_capacity(worker_count.get())),
        }
    }

    /// Spawns the worker threads.
    ///
    /// Calling this again after a successful start does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the pool has already been closed. Returns
    /// [`Error::WorkerSpawn`] if a worker thread cannot be created, in which case the workers
    /// spawned before the failure keep running until the pool is closed.
    pub fn start(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        // Acquire on failure to synchronize with the Release on successful exchange.
        let already_started = self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err();

        if already_started {
            return Ok(());
        }

        for worker_index in 0..self.worker_count.get() {
            let core = WorkerCore::new(self.job_receiver.clone(), self.close_receiver.clone());

            let handle = thread::Builder::new()
                .name(format!("job_pool-w{worker_index}"))
                .spawn(move || worker_loop(&core, worker_index))
                .map_err(|source| Error::WorkerSpawn {
                    worker_index,
                    source,
                })?;

            self.worker_handles.lock().push(handle);
        }

        debug!(
            worker_count = self.worker_count.get(),
            queue_capacity = self.queue_capacity.get(),
            "job pool started"
        );

        Ok(())
    }

    /// Enqueues a job for execution by one of the workers.
    ///
    /// Blocks while the queue is full. A push that is blocked when the pool gets closed
    /// returns [`Error::Closed`] instead of waiting any longer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the pool is closed.
    pub fn push<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // The sender is cloned out of the lock so that a blocked push never holds up close().
        let sender = self.job_sender.lock().clone().ok_or(Error::Closed)?;
        let job: Job = Box::new(job);

        select! {
            send(sender, job) -> result => result.map_err(|_| Error::Closed),
            recv(self.close_receiver) -> _ => Err(Error::Closed),
        }
    }

    /// Number of jobs waiting in the queue, not counting jobs that are already executing.
    #[must_use]
    pub fn len(&self) -> usize {
        self.job_receiver.len()
    }

    /// Whether no jobs are waiting in the queue.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.job_receiver.is_empty()
    }

    /// Number of worker threads the pool runs once started.
    #[must_use]
    pub fn worker_count(&self) -> NonZero<usize> {
        self.worker_count
    }

    /// Maximum number of jobs that can wait in the queue.
    #[must_use]
    pub fn queue_capacity(&self) -> NonZero<usize> {
        self.queue_capacity
    }

    /// Whether [`close()`][Self::close] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.job_sender.lock().is_none()
    }

    /// Stops accepting jobs, shuts down the workers and waits for them to exit.
    ///
    /// Jobs that are already executing run to completion. Jobs still in the queue are dropped
    /// without being executed. Closing an already closed pool does nothing.
    ///
    /// Must not be called from inside a job, as the worker would wait for itself to exit.
    #[cfg_attr(test, mutants::skip)] // Removing this causes timeouts (workers never stop).
    pub fn close(&self) {
        let was_open = self.job_sender.lock().take().is_some();
        drop(self.close_sender.lock().take());

        let handles = mem::take(&mut *self.worker_handles.lock());

        for handle in handles {
            if let Err(payload) = handle.join() {
                // Jobs run inside a panic trap, so a panicking worker means the pool
                // infrastructure itself is broken.
                panic::resume_unwind(payload);
            }
        }

        let abandoned = self.job_receiver.try_iter().count();

        if was_open {
            debug!(abandoned, "job pool closed");
        }
    }
}

impl Drop for JobPool {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for JobPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobPool")
            .field("worker_count", &self.worker_count)
            .field("queue_capacity", &self.queue_capacity)
            .field("queued", &self.len())
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
