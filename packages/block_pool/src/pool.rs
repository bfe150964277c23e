use std::num::NonZero;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::{fmt, mem, panic};

use tracing::{debug, trace};

use crate::{Block, BlockPoolBuilder, Cluster, ClusterSizing, PoolStats, spawn_shelver};

/// A concurrent pool of reference-counted byte blocks, organized by size class.
///
/// The pool owns a fixed table of size classes ("clusters"). Size class `i` serves blocks of
/// `(i + 1) * granularity` bytes and [`alloc(size)`](Self::alloc) routes a request to size
/// class `size / granularity`. Requests beyond the last size class are served by one-off
/// allocations of exactly the requested size that are never pooled.
///
/// There is no method to return a block. Blocks go back to their size class on their own when
/// the last [`Block`] handle referring to them is released or dropped.
///
/// # Memory
///
/// The pool never gives memory back while it exists. A size class that runs dry allocates a
/// new batch of blocks instead of waiting for releases, so the footprint is bounded only by
/// the peak number of blocks leased at the same time. Dropping the pool frees all free blocks;
/// blocks still leased at that point are freed when their last handle goes away.
///
/// # Threads
///
/// Each pool runs one background thread that moves freshly allocated batches of blocks into
/// their size classes. It is stopped and joined when the pool is dropped.
///
/// # Thread safety
///
/// The pool is [`Send`] and [`Sync`] and is meant to be shared by reference (or in an
/// [`Arc`]) between all the threads of the subsystem that owns it.
///
/// # Example
///
/// ```rust
/// use block_pool::BlockPool;
///
/// let pool = BlockPool::new("requests");
///
/// let block = pool.alloc(20);
/// assert_eq!(block.buffer().len(), 20);
/// assert_eq!(block.capacity(), 24);
///
/// let big = pool.alloc(300);
/// assert_eq!(big.capacity(), 300);
/// assert!(!big.is_pooled());
/// ```
pub struct BlockPool {
    id: Arc<str>,
    granularity: NonZero<usize>,
    cluster_count: NonZero<usize>,
    clusters: Box<[Arc<Cluster>]>,

    /// `None` only while the pool is being dropped.
    shelver: Option<JoinHandle<()>>,
}

impl BlockPool {
    /// Creates a pool with default settings.
    ///
    /// The `id` only serves to tell pools apart in logs and diagnostics.
    /// Use [`BlockPool::builder()`] for custom configuration.
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self::builder(id).build()
    }

    /// Creates a builder for configuring the pool.
    pub fn builder(id: impl Into<Arc<str>>) -> BlockPoolBuilder {
        BlockPoolBuilder::new(id.into())
    }

    pub(crate) fn new_inner(
        id: Arc<str>,
        granularity: NonZero<usize>,
        cluster_count: NonZero<usize>,
        sizing: ClusterSizing,
    ) -> Self {
        let (shelve_sender, shelver) = spawn_shelver(&id);

        let clusters: Box<[Arc<Cluster>]> = (1..=cluster_count.get())
            .map(|class| {
                let block_size = NonZero::new(class)
                    .and_then(|class| class.checked_mul(granularity))
                    .expect("block size of a size class overflows usize");

                assert!(
                    block_size
                        .checked_mul(sizing.batch_size(block_size))
                        .is_some(),
                    "replenishment chunk of a size class overflows usize"
                );

                Cluster::new(Arc::clone(&id), block_size, sizing, shelve_sender.clone())
            })
            .collect();

        debug!(
            pool_id = %id,
            granularity = granularity.get(),
            cluster_count = cluster_count.get(),
            "block pool created"
        );

        Self {
            id,
            granularity,
            cluster_count,
            clusters,
            shelver: Some(shelver),
        }
    }

    /// Leases a block whose buffer is exactly `size` bytes long.
    ///
    /// The block comes from size class `size / granularity` when that size class exists, in
    /// which case its capacity is the block size of that size class. Otherwise a one-off
    /// block with a capacity of exactly `size` is allocated; it is freed rather than pooled
    /// when released.
    ///
    /// This never fails and never waits for other threads to release blocks.
    #[must_use]
    pub fn alloc(&self, size: usize) -> Block {
        let class = size / self.granularity;

        if let Some(cluster) = self.clusters.get(class) {
            return cluster.pop(size);
        }

        trace!(pool_id = %self.id, size, "allocating oversized block");
        Block::unpooled(size)
    }

    /// Identifier given to the pool at creation time.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Step between consecutive size classes, in bytes.
    #[must_use]
    pub fn granularity(&self) -> NonZero<usize> {
        self.granularity
    }

    /// Number of size classes.
    #[must_use]
    pub fn cluster_count(&self) -> NonZero<usize> {
        self.cluster_count
    }

    /// Smallest requested size that is no longer pooled.
    ///
    /// Every `alloc(size)` with `size < max_pooled_size()` is served from a size class.
    #[must_use]
    pub fn max_pooled_size(&self) -> usize {
        // Cannot overflow, the builder verified the largest block size fits.
        self.granularity.get().wrapping_mul(self.cluster_count.get())
    }

    /// Takes a snapshot of the occupancy of every size class.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats::new(
            self.id.to_string(),
            self.clusters
                .iter()
                .map(Arc::as_ref)
                .map(Cluster::stats)
                .collect(),
        )
    }
}

impl Drop for BlockPool {
    #[cfg_attr(test, mutants::skip)] // Removing this only leaves the shelving thread unjoined.
    fn drop(&mut self) {
        // The clusters hold the only senders, so dropping them lets the shelving thread drain
        // its queue and exit.
        drop(mem::take(&mut self.clusters));

        let Some(shelver) = self.shelver.take() else {
            return;
        };

        if let Err(payload) = shelver.join() {
            // Shelving never runs user code, so a panic here means the pool itself is broken.
            panic::resume_unwind(payload);
        }
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("id", &self.id)
            .field("granularity", &self.granularity)
            .field("cluster_count", &self.cluster_count)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for BlockPool {
    #[cfg_attr(test, mutants::skip)] // Trivial delegation, do not waste time on mutation.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.stats(), f)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;
    use testing::{eventually, with_watchdog};

    use super::*;

    assert_impl_all!(BlockPool: Send, Sync, fmt::Debug, fmt::Display);

    #[test]
    fn cluster_block_sizes_step_by_granularity() {
        let pool = BlockPool::builder("sizes").cluster_count(nz!(4)).build();

        let sizes: Vec<usize> = pool.clusters.iter().map(|c| c.block_size().get()).collect();
        assert_eq!(sizes, vec![8, 16, 24, 32]);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn alloc_routes_to_size_class() {
        with_watchdog(|| {
            let pool = BlockPool::new("routing");

            let block = pool.alloc(20);

            assert_eq!(block.capacity(), 24);
            assert_eq!(block.len(), 20);
            assert!(block.is_pooled());

            let stats = pool.stats();
            assert_eq!(stats.clusters().get(2).unwrap().replenishments(), 1);
            assert_eq!(stats.clusters().get(1).unwrap().replenishments(), 0);
        });
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn exact_multiple_of_granularity_uses_next_class() {
        with_watchdog(|| {
            let pool = BlockPool::new("multiples");

            assert_eq!(pool.alloc(0).capacity(), 8);
            assert_eq!(pool.alloc(8).capacity(), 16);
            assert_eq!(pool.alloc(255).capacity(), 256);
        });
    }

    #[test]
    fn oversized_request_is_not_pooled() {
        let pool = BlockPool::new("oversized");

        let block = pool.alloc(300);

        assert_eq!(block.capacity(), 300);
        assert_eq!(block.buffer().len(), 300);
        assert!(!block.is_pooled());
        assert_eq!(pool.stats().carved_blocks(), 0);
    }

    #[test]
    fn boundary_size_is_not_pooled() {
        let pool = BlockPool::new("boundary");
        assert_eq!(pool.max_pooled_size(), 256);

        let block = pool.alloc(256);

        assert!(!block.is_pooled());
        assert_eq!(block.capacity(), 256);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn released_block_is_reused() {
        with_watchdog(|| {
            let pool = BlockPool::builder("reuse")
                .bytes_per_replenish_batch(nz!(1))
                .max_cluster_bytes(nz!(1))
                .build();

            // Batches of one block in a single group, so nothing is shelved in the background
            // and the released block is the only candidate for the next pop.
            let first = pool.alloc(10);
            first.buffer().fill(7);
            first.release();

            let second = pool.alloc(12);

            assert_eq!(second.len(), 12);
            assert!(second.buffer().iter().take(10).all(|b| *b == 7));
            assert_eq!(pool.stats().carved_blocks(), 1);
        });
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn leased_blocks_survive_pool_drop() {
        with_watchdog(|| {
            let pool = BlockPool::new("dropped");
            let block = pool.alloc(100);
            let oversized = pool.alloc(1000);
            eventually(|| pool.stats().free_blocks() > 0);

            drop(pool);

            block.buffer().fill(1);
            oversized.buffer().fill(2);
            assert_eq!(block.buffer().len(), 100);
            block.release();
            oversized.release();
        });
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn display_starts_with_pool_header() {
        with_watchdog(|| {
            let pool = BlockPool::builder("shown").cluster_count(nz!(2)).build();

            let output = pool.to_string();

            assert!(output.starts_with("Pool{id:shown,clusters:2}\n"));
            assert!(output.contains("cluster{8,groups:"));
            assert!(output.contains("cluster{16,groups:"));
        });
    }
}
