use std::num::NonZero;

use bytes::BytesMut;

/// One contiguous backing allocation, carved into equally sized block views.
///
/// Every view handed out by a chunk shares ownership of the single underlying allocation.
/// The memory is released only after the last view is dropped, no matter whether that view
/// is sitting in a freelist or is leased to a caller.
///
/// A chunk is created already split: [`Chunk::allocate`] returns the first view separately,
/// and the chunk itself iterates over the views that remain.
#[derive(Debug)]
pub(crate) struct Chunk {
    remaining: BytesMut,
    block_size: NonZero<usize>,
}

impl Chunk {
    /// Allocates storage for `block_count` blocks of `block_size` bytes each.
    ///
    /// Returns the view of the first block together with the chunk that yields the other
    /// `block_count - 1` views.
    ///
    /// # Panics
    ///
    /// Panics if the total size of the chunk does not fit in `usize`.
    pub(crate) fn allocate(
        block_size: NonZero<usize>,
        block_count: NonZero<usize>,
    ) -> (BytesMut, Self) {
        let total = block_size
            .checked_mul(block_count)
            .expect("chunk size overflows usize - the pool builder rejects such size classes");

        let mut remaining = BytesMut::zeroed(total.get());
        let first = remaining.split_to(block_size.get());

        (
            first,
            Self {
                remaining,
                block_size,
            },
        )
    }

    /// Number of block views that have not been carved yet.
    pub(crate) fn len(&self) -> usize {
        self.remaining.len() / self.block_size
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining.is_empty()
    }
}

impl Iterator for Chunk {
    type Item = BytesMut;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.len() < self.block_size.get() {
            return None;
        }

        Some(self.remaining.split_to(self.block_size.get()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.len();
        (len, Some(len))
    }
}

impl ExactSizeIterator for Chunk {}
