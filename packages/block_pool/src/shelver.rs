//! Background shelving of freshly replenished blocks.

use std::sync::Weak;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Sender, unbounded};
use tracing::debug;

use crate::{Chunk, Cluster};

/// The blocks of a replenishment chunk that were not handed to the caller, on their way into
/// the freelist of the cluster that allocated them.
#[derive(Debug)]
pub(crate) struct ShelveRequest {
    owner: Weak<Cluster>,
    remainder: Chunk,
}

impl ShelveRequest {
    pub(crate) fn new(owner: Weak<Cluster>, remainder: Chunk) -> Self {
        Self { owner, remainder }
    }

    /// Pushes every block of the remainder into the owning cluster.
    ///
    /// If the cluster no longer exists, the remainder is dropped and its memory freed.
    pub(crate) fn shelve(self) {
        if let Some(cluster) = self.owner.upgrade() {
            cluster.shelve(self.remainder);
        }
    }
}

/// Starts the shelving worker of a pool.
///
/// The worker processes requests in the order they are sent and exits once every sender has
/// been dropped and the queue is drained.
///
/// # Panics
///
/// Panics if the operating system refuses to create the thread.
pub(crate) fn spawn_shelver(pool_id: &str) -> (Sender<ShelveRequest>, JoinHandle<()>) {
    let (sender, receiver) = unbounded::<ShelveRequest>();
    let thread_pool_id = pool_id.to_owned();

    let handle = thread::Builder::new()
        .name(format!("block_pool-{pool_id}-shelver"))
        .spawn(move || {
            debug!(pool_id = thread_pool_id, "shelving thread started");

            for request in receiver {
                request.shelve();
            }

            debug!(pool_id = thread_pool_id, "shelving thread exiting");
        })
        .expect("failed to spawn shelving thread: thread spawning failure is not supported");

    (sender, handle)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;

    use new_zealand::nz;
    use testing::{eventually, with_watchdog};

    use super::*;
    use crate::ClusterSizing;

    fn single_group_cluster(sender: Sender<ShelveRequest>) -> Arc<Cluster> {
        let sizing = ClusterSizing {
            bytes_per_replenish_batch: nz!(64),
            target_blocks_per_group: nz!(1),
            max_cluster_bytes: nz!(1),
        };

        Cluster::new(Arc::from("shelver"), nz!(16), sizing, sender)
    }

    #[test]
    fn shelve_fills_live_cluster() {
        let (sender, _receiver) = unbounded();
        let cluster = single_group_cluster(sender);

        let (_first, remainder) = Chunk::allocate(nz!(16), nz!(4));
        ShelveRequest::new(Arc::downgrade(&cluster), remainder).shelve();

        let stats = cluster.stats();
        assert_eq!(stats.free_blocks(), 3);
        assert_eq!(stats.carved_blocks(), 3);
    }

    #[test]
    fn shelve_for_dropped_cluster_frees_remainder() {
        let (sender, _receiver) = unbounded();
        let cluster = single_group_cluster(sender);
        let owner = Arc::downgrade(&cluster);
        drop(cluster);

        let (_first, remainder) = Chunk::allocate(nz!(16), nz!(4));

        // Nothing to push into, the request simply goes away.
        ShelveRequest::new(owner, remainder).shelve();
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn worker_shelves_every_request() {
        with_watchdog(|| {
            let (sender, handle) = spawn_shelver("worker");
            let cluster = single_group_cluster(sender.clone());

            for _ in 0..10 {
                let (_first, remainder) = Chunk::allocate(nz!(16), nz!(3));
                sender
                    .send(ShelveRequest::new(Arc::downgrade(&cluster), remainder))
                    .unwrap();
            }

            eventually(|| cluster.stats().free_blocks() == 20);

            drop(sender);
            drop(cluster);
            handle.join().unwrap();
        });
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn worker_exits_when_senders_are_gone() {
        with_watchdog(|| {
            let (sender, handle) = spawn_shelver("exiting");

            assert_eq!(
                handle.thread().name(),
                Some("block_pool-exiting-shelver")
            );

            drop(sender);
            handle.join().unwrap();
        });
    }
}
