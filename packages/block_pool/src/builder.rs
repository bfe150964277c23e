use std::num::NonZero;
use std::sync::Arc;

use new_zealand::nz;

use crate::{BlockPool, ClusterSizing};

const DEFAULT_GRANULARITY: NonZero<usize> = nz!(8);
const DEFAULT_CLUSTER_COUNT: NonZero<usize> = nz!(32);
const DEFAULT_BYTES_PER_REPLENISH_BATCH: NonZero<usize> = nz!(4096);
const DEFAULT_TARGET_BLOCKS_PER_GROUP: NonZero<usize> = nz!(4096);
const DEFAULT_MAX_CLUSTER_BYTES: NonZero<usize> = nz!(1024 * 1024);

/// Builder for creating an instance of [`BlockPool`].
///
/// Every setting has a default, so the builder can be used as-is. The defaults give 32 size
/// classes in steps of 8 bytes (blocks of 8 to 256 bytes).
///
/// # Examples
///
/// ```
/// use block_pool::BlockPool;
/// use new_zealand::nz;
///
/// let pool = BlockPool::builder("io")
///     .granularity(nz!(64))
///     .cluster_count(nz!(16))
///     .build();
///
/// assert_eq!(pool.max_pooled_size(), 1024);
/// ```
#[derive(Debug)]
#[must_use]
pub struct BlockPoolBuilder {
    id: Arc<str>,
    granularity: NonZero<usize>,
    cluster_count: NonZero<usize>,
    sizing: ClusterSizing,
}

impl BlockPoolBuilder {
    pub(crate) fn new(id: Arc<str>) -> Self {
        Self {
            id,
            granularity: DEFAULT_GRANULARITY,
            cluster_count: DEFAULT_CLUSTER_COUNT,
            sizing: ClusterSizing {
                bytes_per_replenish_batch: DEFAULT_BYTES_PER_REPLENISH_BATCH,
                target_blocks_per_group: DEFAULT_TARGET_BLOCKS_PER_GROUP,
                max_cluster_bytes: DEFAULT_MAX_CLUSTER_BYTES,
            },
        }
    }

    /// Sets the step between consecutive size classes, in bytes.
    ///
    /// Size class `i` holds blocks of `(i + 1) * granularity` bytes. Default is 8.
    pub fn granularity(mut self, granularity: NonZero<usize>) -> Self {
        self.granularity = granularity;
        self
    }

    /// Sets the number of size classes.
    ///
    /// Requests for `cluster_count * granularity` bytes or more are not pooled. Default is 32.
    pub fn cluster_count(mut self, cluster_count: NonZero<usize>) -> Self {
        self.cluster_count = cluster_count;
        self
    }

    /// Sets the approximate number of bytes allocated each time a size class runs dry.
    ///
    /// A size class with blocks of `n` bytes allocates `bytes / n + 1` blocks at a time, so
    /// the batch shrinks as the block size grows. Default is 4096.
    pub fn bytes_per_replenish_batch(mut self, bytes: NonZero<usize>) -> Self {
        self.sizing.bytes_per_replenish_batch = bytes;
        self
    }

    /// Sets how many blocks each freelist group is expected to hold.
    ///
    /// Together with [`max_cluster_bytes`](Self::max_cluster_bytes) this determines how many
    /// independently locked groups each size class is split into. Default is 4096.
    pub fn target_blocks_per_group(mut self, blocks: NonZero<usize>) -> Self {
        self.sizing.target_blocks_per_group = blocks;
        self
    }

    /// Sets the expected memory footprint of one size class, used to size its freelist groups.
    ///
    /// A size class with blocks of `n` bytes gets `bytes / n / target_blocks_per_group + 1`
    /// groups. This is a sizing hint, not a limit - the pool never refuses to grow.
    /// Default is 1 MiB.
    pub fn max_cluster_bytes(mut self, bytes: NonZero<usize>) -> Self {
        self.sizing.max_cluster_bytes = bytes;
        self
    }

    /// Builds the pool with the configured settings.
    ///
    /// # Panics
    ///
    /// Panics if the block size of the largest size class, or the replenishment chunk of any
    /// size class, does not fit in `usize`.
    #[must_use]
    pub fn build(self) -> BlockPool {
        BlockPool::new_inner(self.id, self.granularity, self.cluster_count, self.sizing)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(BlockPoolBuilder: Send, Sync, std::fmt::Debug);

    #[test]
    fn defaults() {
        let builder = BlockPoolBuilder::new(Arc::from("defaults"));

        assert_eq!(builder.granularity.get(), 8);
        assert_eq!(builder.cluster_count.get(), 32);
        assert_eq!(builder.sizing.bytes_per_replenish_batch.get(), 4096);
        assert_eq!(builder.sizing.target_blocks_per_group.get(), 4096);
        assert_eq!(builder.sizing.max_cluster_bytes.get(), 1024 * 1024);
    }

    #[test]
    fn setters_override_defaults() {
        let builder = BlockPoolBuilder::new(Arc::from("custom"))
            .granularity(nz!(16))
            .cluster_count(nz!(4))
            .bytes_per_replenish_batch(nz!(128))
            .target_blocks_per_group(nz!(2))
            .max_cluster_bytes(nz!(512));

        assert_eq!(builder.granularity.get(), 16);
        assert_eq!(builder.cluster_count.get(), 4);
        assert_eq!(
            builder.sizing,
            ClusterSizing {
                bytes_per_replenish_batch: nz!(128),
                target_blocks_per_group: nz!(2),
                max_cluster_bytes: nz!(512),
            }
        );
    }

    #[test]
    fn build_creates_one_cluster_per_size_class() {
        let pool = BlockPoolBuilder::new(Arc::from("built"))
            .granularity(nz!(16))
            .cluster_count(nz!(4))
            .build();

        assert_eq!(pool.id(), "built");
        assert_eq!(pool.granularity().get(), 16);
        assert_eq!(pool.cluster_count().get(), 4);
        assert_eq!(pool.max_pooled_size(), 64);
    }

    #[test]
    #[should_panic(expected = "block size of a size class overflows usize")]
    fn overflowing_size_classes_panic() {
        let _pool = BlockPoolBuilder::new(Arc::from("overflow"))
            .granularity(nz!(usize::MAX / 2))
            .cluster_count(nz!(3))
            .build();
    }

    #[test]
    #[should_panic(expected = "replenishment chunk of a size class overflows usize")]
    fn overflowing_replenishment_chunk_panics() {
        // Both block sizes fit, but a batch of five quarter-address-space blocks does not.
        let _pool = BlockPoolBuilder::new(Arc::from("overflow"))
            .granularity(nz!(usize::MAX / 4))
            .cluster_count(nz!(2))
            .bytes_per_replenish_batch(nz!(usize::MAX))
            .build();
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn builder_can_move_between_threads() {
        let builder = BlockPoolBuilder::new(Arc::from("mobile")).cluster_count(nz!(2));

        let pool = std::thread::spawn(move || builder.build())
            .join()
            .expect("thread completed successfully");

        assert_eq!(pool.cluster_count().get(), 2);
    }
}
