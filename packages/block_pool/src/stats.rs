use std::fmt;

/// Point-in-time occupancy of one size class.
///
/// Obtained from [`PoolStats::clusters()`]. The numbers are gathered one group at a time
/// while other threads keep allocating and releasing, so they are only approximately
/// consistent with each other.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterStats {
    block_size: usize,
    group_lengths: Vec<usize>,
    carved_blocks: usize,
    replenishments: usize,
    pops: usize,
}

impl ClusterStats {
    pub(crate) fn new(
        block_size: usize,
        group_lengths: Vec<usize>,
        carved_blocks: usize,
        replenishments: usize,
        pops: usize,
    ) -> Self {
        Self {
            block_size,
            group_lengths,
            carved_blocks,
            replenishments,
            pops,
        }
    }

    /// Capacity of every block in this size class.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of free blocks in each group.
    #[must_use]
    pub fn group_lengths(&self) -> &[usize] {
        &self.group_lengths
    }

    /// Total number of free blocks across all groups.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.group_lengths.iter().sum()
    }

    /// Number of blocks this size class has ever created, free or leased.
    #[must_use]
    pub fn carved_blocks(&self) -> usize {
        self.carved_blocks
    }

    /// Number of times this size class found a group empty and allocated a new chunk.
    #[must_use]
    pub fn replenishments(&self) -> usize {
        self.replenishments
    }

    /// Number of pops served by this size class.
    #[must_use]
    pub fn pops(&self) -> usize {
        self.pops
    }
}

impl fmt::Display for ClusterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cluster{{{},groups:{},pop:{},len:{}/{} [",
            self.block_size,
            self.group_lengths.len(),
            self.pops,
            self.free_blocks(),
            self.carved_blocks
        )?;

        for (index, len) in self.group_lengths.iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }

            write!(f, "{len}")?;
        }

        f.write_str("]}")
    }
}

/// Point-in-time occupancy of a [`BlockPool`][crate::BlockPool].
///
/// Meant for diagnostics only. Use [`BlockPool::stats()`][crate::BlockPool::stats] to obtain one.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolStats {
    id: String,
    clusters: Vec<ClusterStats>,
}

impl PoolStats {
    pub(crate) fn new(id: String, clusters: Vec<ClusterStats>) -> Self {
        Self { id, clusters }
    }

    /// Identifier of the pool the statistics were taken from.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Statistics of every size class, ordered from the smallest block size to the largest.
    #[must_use]
    pub fn clusters(&self) -> &[ClusterStats] {
        &self.clusters
    }

    /// Total number of free blocks in the pool.
    #[must_use]
    pub fn free_blocks(&self) -> usize {
        self.clusters.iter().map(ClusterStats::free_blocks).sum()
    }

    /// Total number of blocks the pool has ever created, free or leased.
    #[must_use]
    pub fn carved_blocks(&self) -> usize {
        self.clusters.iter().map(ClusterStats::carved_blocks).sum()
    }

    /// Total number of bytes held by the pool's size classes, free or leased.
    #[must_use]
    pub fn carved_bytes(&self) -> usize {
        self.clusters
            .iter()
            .map(|c| c.carved_blocks.saturating_mul(c.block_size))
            .fold(0, usize::saturating_add)
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Pool{{id:{},clusters:{}}}",
            self.id,
            self.clusters.len()
        )?;

        for cluster in &self.clusters {
            writeln!(f, "{cluster}")?;
        }

        Ok(())
    }
}
