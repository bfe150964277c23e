use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{self, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::Cluster;

/// The persistent record behind a block lease.
///
/// A pooled cell is created once, at replenishment time, and is then recycled between its
/// cluster's freelist and callers for as long as the cluster exists. An unpooled cell lives
/// exactly as long as its leases.
pub(crate) struct BlockCell {
    /// Number of outstanding [`Block`] handles. Zero means the cell is free, in which case a
    /// pooled cell is present in exactly one group of its owning cluster.
    leases: AtomicUsize,

    body: Mutex<BlockBody>,

    /// Length of the backing view, fixed at creation.
    capacity: usize,

    /// The cluster that recycles this cell once the last lease is released.
    ///
    /// This is never an owning reference - outstanding blocks do not keep a cluster alive.
    /// If the cluster is gone by the time the last lease is released, the cell is dropped.
    owner: Option<Weak<Cluster>>,
}

struct BlockBody {
    bytes: BytesMut,

    /// Logical size requested by the current leaseholder. Never greater than `bytes.len()`.
    len: usize,
}

impl BlockCell {
    pub(crate) fn pooled(owner: Weak<Cluster>, bytes: BytesMut) -> Self {
        Self {
            leases: AtomicUsize::new(0),
            capacity: bytes.len(),
            body: Mutex::new(BlockBody { bytes, len: 0 }),
            owner: Some(owner),
        }
    }

    pub(crate) fn unpooled(size: usize) -> Self {
        Self {
            leases: AtomicUsize::new(0),
            capacity: size,
            body: Mutex::new(BlockBody {
                bytes: BytesMut::zeroed(size),
                len: 0,
            }),
            owner: None,
        }
    }

    /// Hands out the first lease on a free cell, sized to `len` bytes.
    ///
    /// The logical size is assigned under the cell's lock before the lease exists, so no
    /// other thread can observe the block with a stale size.
    pub(crate) fn lease(self: Arc<Self>, len: usize) -> Block {
        assert!(
            len <= self.capacity,
            "requested length {len} exceeds block capacity {}",
            self.capacity
        );

        self.body.lock().len = len;

        // The freelist mutex already orders this against the release that freed the cell.
        let previous = self.leases.fetch_add(1, Ordering::Relaxed);
        debug_assert_eq!(
            previous, 0,
            "a block taken from a freelist must not have outstanding leases"
        );

        Block { cell: self }
    }
}

impl fmt::Debug for BlockCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockCell")
            .field("leases", &self.leases.load(Ordering::Relaxed))
            .field("capacity", &self.capacity)
            .field("pooled", &self.owner.is_some())
            .finish_non_exhaustive()
    }
}

/// A lease on a byte block obtained from a [`BlockPool`][crate::BlockPool].
///
/// Each `Block` value is one reference on the underlying block. Cloning the handle (or calling
/// [`retain()`][Self::retain]) adds a reference; dropping it (or calling
/// [`release()`][Self::release]) removes one. When the last reference is released, a pooled
/// block returns to the freelist of the size class it came from, exactly once. Oversized blocks
/// are freed instead.
///
/// Because releasing consumes the handle, a block cannot be released more times than it was
/// leased and retained.
///
/// # Contents
///
/// The bytes of a recycled block are not cleared between leases. A freshly allocated block
/// starts zeroed; a reused one contains whatever the previous leaseholder left behind.
///
/// # Thread safety
///
/// The handle is [`Send`] and [`Sync`]. All clones share the same bytes, and access to them is
/// serialized through the guard returned by [`buffer()`][Self::buffer].
pub struct Block {
    cell: Arc<BlockCell>,
}

impl Block {
    /// Capacity of the backing storage in bytes.
    ///
    /// For pooled blocks this is the block size of the size class. For oversized blocks it is
    /// exactly the size that was requested.
    #[must_use]
    #[inline]
    pub fn capacity(&self) -> usize {
        self.cell.capacity
    }

    /// Logical size of the block, as requested by the caller that allocated it.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cell.body.lock().len
    }

    /// Whether the logical size of the block is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this block returns to a pool when released.
    ///
    /// Oversized blocks are served by one-off allocations and are never pooled.
    #[must_use]
    #[inline]
    pub fn is_pooled(&self) -> bool {
        self.cell.owner.is_some()
    }

    /// Current number of references on the block.
    ///
    /// This is a snapshot for diagnostics - other threads holding clones of this handle may
    /// change it at any time.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.cell.leases.load(Ordering::Acquire)
    }

    /// Locks the block and returns a read/write view of exactly [`len()`][Self::len] bytes.
    ///
    /// The block stays locked until the guard is dropped. Other clones of this handle calling
    /// `buffer()` (or [`len()`][Self::len]) meanwhile will block, so do not hold the guard of
    /// one clone while asking another clone for its buffer on the same thread.
    ///
    /// # Example
    ///
    /// ```rust
    /// use block_pool::BlockPool;
    ///
    /// let pool = BlockPool::new("docs");
    /// let block = pool.alloc(5);
    ///
    /// block.buffer().copy_from_slice(b"hello");
    /// assert_eq!(&*block.buffer(), b"hello");
    /// ```
    #[must_use]
    #[expect(
        clippy::indexing_slicing,
        reason = "len never exceeds capacity, enforced when the block is leased"
    )]
    pub fn buffer(&self) -> BufferGuard<'_> {
        let inner = MutexGuard::map(self.cell.body.lock(), |body| {
            let len = body.len;
            &mut body.bytes[..len]
        });

        BufferGuard { inner }
    }

    /// Adds a reference to the block, returning a new handle to it.
    ///
    /// This is the same as cloning the handle.
    #[must_use]
    pub fn retain(&self) -> Self {
        // Same reasoning as `Arc::clone` - a new reference can only be made from an existing
        // one, so there is nothing to synchronize with.
        self.cell.leases.fetch_add(1, Ordering::Relaxed);

        Self {
            cell: Arc::clone(&self.cell),
        }
    }

    /// Removes a reference from the block.
    ///
    /// If this was the last reference, a pooled block is returned to its size class for reuse.
    /// This is the same as dropping the handle.
    #[inline]
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    pub fn release(self) {
        drop(self);
    }

    /// Whether two handles refer to the same underlying block.
    #[must_use]
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.cell, &other.cell)
    }

    /// Creates a one-off block of exactly `size` bytes that is never pooled.
    pub(crate) fn unpooled(size: usize) -> Self {
        Arc::new(BlockCell::unpooled(size)).lease(size)
    }
}

impl Clone for Block {
    fn clone(&self) -> Self {
        self.retain()
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        // Release publishes everything this leaseholder did before the cell can be leased again.
        let previous = self.cell.leases.fetch_sub(1, Ordering::Release);
        debug_assert_ne!(previous, 0, "block released more times than it was leased");

        if previous != 1 {
            return;
        }

        atomic::fence(Ordering::Acquire);

        let Some(cluster) = self.cell.owner.as_ref().and_then(Weak::upgrade) else {
            // Oversized block, or the size class is already gone. Either way the storage is
            // freed together with the last reference to the cell.
            return;
        };

        cluster.push(Arc::clone(&self.cell));
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.len();

        write!(
            f,
            "Block{{Cap:{},Size:{},Ref:{}}}",
            self.capacity(),
            len,
            self.ref_count()
        )
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("ref_count", &self.ref_count())
            .field("pooled", &self.is_pooled())
            .finish()
    }
}

/// Exclusive access to the logical bytes of a [`Block`].
///
/// Returned by [`Block::buffer()`]. The block is locked for as long as this guard exists.
pub struct BufferGuard<'a> {
    inner: MappedMutexGuard<'a, [u8]>,
}

impl Deref for BufferGuard<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for BufferGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl fmt::Debug for BufferGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferGuard")
            .field("len", &self.inner.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Block: Send, Sync, Clone, Debug);
    assert_impl_all!(BlockCell: Send, Sync);

    #[test]
    fn unpooled_block_has_exact_capacity() {
        let block = Block::unpooled(300);

        assert_eq!(block.capacity(), 300);
        assert_eq!(block.len(), 300);
        assert_eq!(block.buffer().len(), 300);
        assert!(!block.is_pooled());
        assert_eq!(block.ref_count(), 1);
    }

    #[test]
    fn zero_sized_block_is_empty() {
        let block = Block::unpooled(0);

        assert!(block.is_empty());
        assert!(block.buffer().is_empty());
    }

    #[test]
    fn retain_and_release_adjust_ref_count() {
        let block = Block::unpooled(8);

        let second = block.retain();
        let third = block.clone();
        assert_eq!(block.ref_count(), 3);
        assert!(Block::ptr_eq(&block, &second));
        assert!(Block::ptr_eq(&block, &third));

        second.release();
        assert_eq!(block.ref_count(), 2);

        drop(third);
        assert_eq!(block.ref_count(), 1);
    }

    #[test]
    fn clones_share_bytes() {
        let block = Block::unpooled(4);
        let other = block.clone();

        block.buffer().copy_from_slice(&[1, 2, 3, 4]);

        assert_eq!(&*other.buffer(), &[1, 2, 3, 4]);
    }

    #[test]
    fn lease_sets_logical_size() {
        let cell = Arc::new(BlockCell::pooled(Weak::new(), BytesMut::zeroed(24)));

        let block = Arc::clone(&cell).lease(20);

        assert_eq!(block.capacity(), 24);
        assert_eq!(block.len(), 20);
        assert_eq!(block.buffer().len(), 20);
        assert!(block.is_pooled());
    }

    #[test]
    #[should_panic]
    fn lease_beyond_capacity_panics() {
        let cell = Arc::new(BlockCell::pooled(Weak::new(), BytesMut::zeroed(8)));

        let _block = cell.lease(9);
    }

    #[test]
    fn release_with_dead_owner_frees_cell() {
        let cell = Arc::new(BlockCell::pooled(Weak::new(), BytesMut::zeroed(8)));
        let block = Arc::clone(&cell).lease(8);
        assert_eq!(Arc::strong_count(&cell), 2);

        block.release();

        // Nobody to recycle into, so only our test reference remains.
        assert_eq!(Arc::strong_count(&cell), 1);
        assert_eq!(cell.leases.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn display_describes_block() {
        let block = Block::unpooled(16);
        let _other = block.retain();

        assert_eq!(block.to_string(), "Block{Cap:16,Size:16,Ref:2}");
    }

    #[test]
    fn debug_mentions_fields() {
        let block = Block::unpooled(2);
        let output = format!("{block:?}");

        assert!(output.contains("capacity: 2"));
        assert!(output.contains("pooled: false"));
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn clones_released_from_many_threads() {
        let block = Block::unpooled(64);

        thread::scope(|s| {
            for _ in 0..8 {
                let clone = block.clone();
                s.spawn(move || {
                    for _ in 0..100 {
                        clone.retain().release();
                    }
                    clone.release();
                });
            }
        });

        assert_eq!(block.ref_count(), 1);
    }
}
