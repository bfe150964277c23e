#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A fixed-size pool of worker threads fed from a bounded job queue.
//!
//! This crate provides [`JobPool`], the simplest kind of worker pool: a fixed number of named
//! threads that take closures off a shared queue and run them. Producers that outpace the
//! workers are slowed down by the queue capacity - [`push()`][JobPool::push] blocks until
//! there is room.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use job_pool::JobPool;
//! use new_zealand::nz;
//!
//! let pool = JobPool::new(nz!(4), nz!(64));
//! pool.start().unwrap();
//!
//! let counter = Arc::new(AtomicUsize::new(0));
//!
//! for _ in 0..10 {
//!     let counter = Arc::clone(&counter);
//!     pool.push(move || {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     })
//!     .unwrap();
//! }
//!
//! // Wait for the queue to drain before shutting down.
//! while counter.load(Ordering::Relaxed) < 10 {
//!     std::thread::yield_now();
//! }
//!
//! pool.close();
//! ```
//!
//! # Shutdown behavior
//!
//! Closing or dropping the pool waits for jobs that are already executing, then abandons any
//! jobs still waiting in the queue. If every job must run, wait for the jobs to signal their
//! completion before closing the pool.
//!
//! # Panics
//!
//! A job that panics is caught, logged through [`tracing`] and otherwise ignored. The worker
//! that ran it continues with the next job.

mod error;
mod pool;
mod worker;

pub use error::Error;
pub(crate) use error::Result;
pub use pool::*;
pub(crate) use worker::*;
