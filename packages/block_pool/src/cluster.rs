use std::fmt;
use std::iter;
use std::num::NonZero;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::channel::{SendError, Sender};
use tracing::{trace, warn};

use crate::{Block, BlockCell, Chunk, ClusterStats, Group, ShelveRequest};

/// Knobs that determine how a cluster is shaped for a given block size.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ClusterSizing {
    pub(crate) bytes_per_replenish_batch: NonZero<usize>,
    pub(crate) target_blocks_per_group: NonZero<usize>,
    pub(crate) max_cluster_bytes: NonZero<usize>,
}

impl ClusterSizing {
    /// Smaller blocks churn more often, so they get more groups to spread the lock traffic.
    pub(crate) fn group_count(&self, block_size: NonZero<usize>) -> NonZero<usize> {
        let blocks_per_cluster = self.max_cluster_bytes.get() / block_size;

        NonZero::<usize>::MIN.saturating_add(blocks_per_cluster / self.target_blocks_per_group)
    }

    /// Each replenishment allocates roughly the same number of bytes, whatever the block size.
    pub(crate) fn batch_size(&self, block_size: NonZero<usize>) -> NonZero<usize> {
        NonZero::<usize>::MIN.saturating_add(self.bytes_per_replenish_batch.get() / block_size)
    }
}

/// The freelist of one size class.
///
/// Free blocks are spread over a fixed number of [`Group`]s, each with its own lock. Pops and
/// pushes pick their group through two independent round-robin cursors, so concurrent callers
/// tend to contend on different locks. Cursor selection itself is a single atomic increment
/// and never waits on a group lock.
///
/// When a pop finds its group empty, the cluster replenishes: it allocates one chunk for a
/// whole batch of blocks, hands the first block straight to the caller and sends the rest to
/// the shelving thread of the pool. A pop that races the shelving thread may replenish again
/// even though blocks are about to arrive - that costs memory, never correctness.
#[derive(Debug)]
pub(crate) struct Cluster {
    pool_id: Arc<str>,
    block_size: NonZero<usize>,
    batch_size: NonZero<usize>,

    groups: Box<[Group]>,

    /// Same as `groups.len()`, kept as `NonZero` for cursor arithmetic.
    group_count: NonZero<usize>,

    pop_cursor: AtomicUsize,
    push_cursor: AtomicUsize,

    /// Blocks ever created by this cluster, free or leased.
    carved_blocks: AtomicUsize,
    replenishments: AtomicUsize,

    shelver: Sender<ShelveRequest>,
}

impl Cluster {
    pub(crate) fn new(
        pool_id: Arc<str>,
        block_size: NonZero<usize>,
        sizing: ClusterSizing,
        shelver: Sender<ShelveRequest>,
    ) -> Arc<Self> {
        let group_count = sizing.group_count(block_size);

        Arc::new(Self {
            pool_id,
            block_size,
            batch_size: sizing.batch_size(block_size),
            groups: iter::repeat_with(Group::default)
                .take(group_count.get())
                .collect(),
            group_count,
            pop_cursor: AtomicUsize::new(0),
            push_cursor: AtomicUsize::new(0),
            carved_blocks: AtomicUsize::new(0),
            replenishments: AtomicUsize::new(0),
            shelver,
        })
    }

    pub(crate) fn block_size(&self) -> NonZero<usize> {
        self.block_size
    }

    pub(crate) fn batch_size(&self) -> NonZero<usize> {
        self.batch_size
    }

    pub(crate) fn group_count(&self) -> NonZero<usize> {
        self.group_count
    }

    /// Leases a block of this size class, with its logical size set to `len`.
    ///
    /// Never waits for a block to be released elsewhere - an empty group is replenished with
    /// fresh memory instead.
    pub(crate) fn pop(self: &Arc<Self>, len: usize) -> Block {
        if let Some(cell) = self.select_group(&self.pop_cursor).try_pop() {
            return cell.lease(len);
        }

        self.replenish(len)
    }

    /// Returns a free cell to one of the groups.
    pub(crate) fn push(&self, cell: Arc<BlockCell>) {
        self.select_group(&self.push_cursor).push(cell);
    }

    #[expect(
        clippy::indexing_slicing,
        reason = "the index is reduced modulo the group count"
    )]
    fn select_group(&self, cursor: &AtomicUsize) -> &Group {
        let turn = cursor.fetch_add(1, Ordering::Relaxed);

        &self.groups[turn % self.group_count]
    }

    fn replenish(self: &Arc<Self>, len: usize) -> Block {
        let (first, remainder) = Chunk::allocate(self.block_size, self.batch_size);
        let owner = Arc::downgrade(self);

        self.replenishments.fetch_add(1, Ordering::Relaxed);
        self.carved_blocks.fetch_add(1, Ordering::Relaxed);

        trace!(
            pool_id = %self.pool_id,
            block_size = self.block_size.get(),
            batch_size = self.batch_size.get(),
            "replenishing size class"
        );

        let block = Arc::new(BlockCell::pooled(Weak::clone(&owner), first)).lease(len);

        if !remainder.is_empty() {
            let request = ShelveRequest::new(owner, remainder);

            if let Err(SendError(request)) = self.shelver.send(request) {
                warn!(
                    pool_id = %self.pool_id,
                    block_size = self.block_size.get(),
                    "shelving thread is gone, shelving replenished blocks inline"
                );
                request.shelve();
            }
        }

        block
    }

    /// Pushes every block of a replenishment remainder into the freelist.
    pub(crate) fn shelve(self: &Arc<Self>, remainder: Chunk) {
        let owner = Arc::downgrade(self);
        let count = remainder.len();
        self.carved_blocks.fetch_add(count, Ordering::Relaxed);

        for bytes in remainder {
            self.push(Arc::new(BlockCell::pooled(Weak::clone(&owner), bytes)));
        }

        trace!(
            pool_id = %self.pool_id,
            block_size = self.block_size.get(),
            count,
            "shelved replenished blocks"
        );
    }

    pub(crate) fn stats(&self) -> ClusterStats {
        ClusterStats::new(
            self.block_size.get(),
            self.groups.iter().map(Group::len).collect(),
            self.carved_blocks.load(Ordering::Relaxed),
            self.replenishments.load(Ordering::Relaxed),
            self.pop_cursor.load(Ordering::Relaxed),
        )
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.stats(), f)
    }
}
