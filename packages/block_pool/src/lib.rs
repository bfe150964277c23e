#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A concurrent pool of reference-counted byte blocks, organized by size class.
//!
//! This crate provides [`BlockPool`], which hands out [`Block`] leases on byte buffers of a
//! requested size and takes them back automatically once the last reference to a block is
//! released. It is meant for I/O heavy code that constantly allocates and discards small
//! buffers of similar sizes, such as network protocol framing.
//!
//! # Quick start
//!
//! ```rust
//! use block_pool::BlockPool;
//!
//! let pool = BlockPool::new("framing");
//!
//! let block = pool.alloc(20);
//! block.buffer().copy_from_slice(&[0xAA; 20]);
//!
//! // Hand a second reference to another consumer.
//! let shared = block.retain();
//! block.release();
//!
//! assert_eq!(shared.buffer().first(), Some(&0xAA));
//!
//! // The block returns to the pool here, when its last reference goes away.
//! shared.release();
//! ```
//!
//! # Size classes
//!
//! The pool is split into a fixed number of size classes that step by a fixed granularity
//! (by default 32 size classes of 8, 16, ..., 256 bytes). A request for `size` bytes is
//! served from size class `size / granularity`, so the capacity of the returned block is the
//! smallest multiple of the granularity that is strictly greater than `size`. The buffer
//! exposed by [`Block::buffer()`] is always exactly `size` bytes long.
//!
//! Requests that fall beyond the last size class are served by one-off allocations of exactly
//! the requested size. Such blocks are freed rather than pooled when released.
//!
//! # Contention
//!
//! Every size class keeps its free blocks in several independently locked groups. Allocating
//! and releasing threads pick groups round-robin, so concurrent callers rarely contend on the
//! same lock. When a group runs dry, the size class allocates a whole batch of blocks in one
//! go, hands one to the caller straight away and shelves the rest on a background thread.
//!
//! # Memory
//!
//! The pool never shrinks and never waits for blocks to be released - exhausting a size class
//! simply allocates more memory. Dropping the pool frees its free blocks. Blocks still leased
//! at that point stay valid and are freed when their last reference is released.
//!
//! # Logging
//!
//! The pool reports lifecycle and replenishment events through [`tracing`]. Install a
//! subscriber to see them; nothing is logged at levels above `debug` unless something goes
//! wrong.

mod block;
mod builder;
mod chunk;
mod cluster;
mod group;
mod pool;
mod shelver;
mod stats;

pub(crate) use block::BlockCell;
pub use block::{Block, BufferGuard};
pub use builder::*;
pub(crate) use chunk::*;
pub(crate) use cluster::*;
pub(crate) use group::*;
pub use pool::*;
pub(crate) use shelver::*;
pub use stats::*;
