use std::sync::Arc;

use parking_lot::Mutex;

use crate::BlockCell;

/// One lock-protected shard of a cluster's freelist.
///
/// Free cells are kept in a stack, so the most recently returned cell is the next one handed
/// out. There is no ordering relationship between different groups of the same cluster.
#[derive(Debug, Default)]
pub(crate) struct Group {
    free: Mutex<Vec<Arc<BlockCell>>>,
}

impl Group {
    pub(crate) fn try_pop(&self) -> Option<Arc<BlockCell>> {
        self.free.lock().pop()
    }

    pub(crate) fn push(&self, cell: Arc<BlockCell>) {
        self.free.lock().push(cell);
    }

    /// Number of free cells in the group right now.
    pub(crate) fn len(&self) -> usize {
        self.free.lock().len()
    }
}
