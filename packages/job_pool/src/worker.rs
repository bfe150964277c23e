//! Worker thread logic for executing jobs from the queue.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crossbeam::channel::{Receiver, TryRecvError, select};
use tracing::{debug, error, trace};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum IterationResult {
    Executed,
    Panicked,
    Shutdown,
}

/// The receiving end of the pool, as seen by one worker.
///
/// The close channel never carries messages. It is disconnected when the pool closes, which
/// wakes every worker blocked on it.
#[derive(Debug)]
pub(crate) struct WorkerCore {
    jobs: Receiver<Job>,
    close: Receiver<()>,
}

impl WorkerCore {
    pub(crate) fn new(jobs: Receiver<Job>, close: Receiver<()>) -> Self {
        Self { jobs, close }
    }

    /// Waits for the next job and runs it, or reports that the pool is shutting down.
    pub(crate) fn run_one_iteration(&self) -> IterationResult {
        // Shutdown wins over queued jobs whenever both are already visible.
        if self.close.try_recv() == Err(TryRecvError::Disconnected) {
            return IterationResult::Shutdown;
        }

        select! {
            recv(self.close) -> _ => IterationResult::Shutdown,
            recv(self.jobs) -> job => match job {
                Ok(job) => run_job(job),
                Err(_) => IterationResult::Shutdown,
            },
        }
    }
}

pub(crate) fn worker_loop(core: &WorkerCore, worker_index: usize) {
    debug!(worker_index, "worker thread started");

    loop {
        match core.run_one_iteration() {
            IterationResult::Executed => {
                trace!(worker_index, "executed job");
            }
            IterationResult::Panicked => {
                trace!(worker_index, "worker continues after job panic");
            }
            IterationResult::Shutdown => break,
        }
    }

    debug!(worker_index, "worker thread exiting");
}

fn run_job(job: Job) -> IterationResult {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(()) => IterationResult::Executed,
        Err(payload) => {
            error!(panic_message = panic_message(payload.as_ref()), "job panicked");
            IterationResult::Panicked
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
