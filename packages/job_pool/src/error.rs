use std::io;

use thiserror::Error;

/// Errors that can occur when operating a [`JobPool`][crate::JobPool].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The pool has been closed and no longer accepts jobs or starts workers.
    #[error("the job pool is closed")]
    Closed,

    /// The operating system refused to create a worker thread.
    #[error("failed to spawn job pool worker thread {worker_index}")]
    WorkerSpawn {
        /// Index of the worker that could not be spawned.
        worker_index: usize,

        /// The error reported by the operating system.
        #[source]
        source: io::Error,
    },
}

/// A specialized `Result` type for job pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
