//! Peer population access and candidate-list construction.
//!
//! The seed, reported and persisted pools are owned by collaborators;
//! this module reads them and builds the priority-ordered, de-duplicated
//! candidate lists the manager dials through.

use tradewind_core::{ConnectionId, NodeAddress};

use crate::transport::CloseReason;

/// A peer with the time it was last seen active (Unix milliseconds).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    /// The peer's overlay address.
    pub address: NodeAddress,
    /// Last observed activity, Unix ms.
    pub last_seen: u64,
}

/// Read access to the three peer pools, plus fault/ban bookkeeping.
///
/// Implementations are plain in-memory registries; the sync layer only
/// mutates them through [`PeerPool::handle_connection_fault`].
pub trait PeerPool: Send + Sync {
    /// Well-known bootstrap addresses.
    fn seed_addresses(&self) -> Vec<NodeAddress>;

    /// Peers other nodes reported recently.
    fn reported_peers(&self) -> Vec<PeerRecord>;

    /// Peers remembered from earlier runs.
    fn persisted_peers(&self) -> Vec<PeerRecord>;

    /// Whether an address is a known seed.
    fn is_seed(&self, address: &NodeAddress) -> bool;

    /// Whether an address is this node's own.
    fn is_self(&self, address: &NodeAddress) -> bool;

    /// This node's own published address, once it has one. Updated
    /// requests carry it so the responder can report this node onward.
    fn self_address(&self) -> Option<NodeAddress>;

    /// Record a connectivity failure against an address.
    fn handle_connection_fault(&self, address: &NodeAddress);

    /// Whether a close reason indicates the peer on `conn` is banned.
    fn is_banned(&self, reason: CloseReason, conn: ConnectionId) -> bool;
}

/// Addresses of `records` sorted by most-recent activity first.
pub fn sorted_by_recency(mut records: Vec<PeerRecord>) -> Vec<NodeAddress> {
    records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    records.into_iter().map(|r| r.address).collect()
}

/// Drop the local node's own address and anything already present in an
/// earlier-priority list.
pub fn filtered<P: PeerPool + ?Sized>(
    pool: &P,
    candidates: Vec<NodeAddress>,
    already_listed: &[NodeAddress],
) -> Vec<NodeAddress> {
    candidates
        .into_iter()
        .filter(|a| !already_listed.contains(a) && !pool.is_self(a))
        .collect()
}

/// [`filtered`], additionally dropping known seed addresses; used for the
/// non-seed fallback lists.
pub fn filtered_non_seed<P: PeerPool + ?Sized>(
    pool: &P,
    candidates: Vec<NodeAddress>,
    already_listed: &[NodeAddress],
) -> Vec<NodeAddress> {
    filtered(pool, candidates, already_listed)
        .into_iter()
        .filter(|a| !pool.is_seed(a))
        .collect()
}

/// An in-memory peer pool for tests.
pub mod memory {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Fixed pools with fault counting.
    #[derive(Default)]
    pub struct MemoryPeerPool {
        seeds: Vec<NodeAddress>,
        reported: Vec<PeerRecord>,
        persisted: Vec<PeerRecord>,
        self_address: Option<NodeAddress>,
        banned: HashSet<ConnectionId>,
        faults: Mutex<Vec<NodeAddress>>,
    }

    impl MemoryPeerPool {
        /// Pool with only seeds.
        pub fn with_seeds(seeds: Vec<NodeAddress>) -> Self {
            Self {
                seeds,
                ..Default::default()
            }
        }

        /// Set the local node's own address.
        pub fn set_self(&mut self, address: NodeAddress) {
            self.self_address = Some(address);
        }

        /// Add a reported peer.
        pub fn add_reported(&mut self, address: NodeAddress, last_seen: u64) {
            self.reported.push(PeerRecord { address, last_seen });
        }

        /// Add a persisted peer.
        pub fn add_persisted(&mut self, address: NodeAddress, last_seen: u64) {
            self.persisted.push(PeerRecord { address, last_seen });
        }

        /// Mark a connection as belonging to a banned peer.
        pub fn ban_connection(&mut self, conn: ConnectionId) {
            self.banned.insert(conn);
        }

        /// Addresses faulted so far, in order.
        pub fn faults(&self) -> Vec<NodeAddress> {
            self.faults.lock().unwrap().clone()
        }
    }

    impl PeerPool for MemoryPeerPool {
        fn seed_addresses(&self) -> Vec<NodeAddress> {
            self.seeds.clone()
        }

        fn reported_peers(&self) -> Vec<PeerRecord> {
            self.reported.clone()
        }

        fn persisted_peers(&self) -> Vec<PeerRecord> {
            self.persisted.clone()
        }

        fn is_seed(&self, address: &NodeAddress) -> bool {
            self.seeds.contains(address)
        }

        fn is_self(&self, address: &NodeAddress) -> bool {
            self.self_address.as_ref() == Some(address)
        }

        fn self_address(&self) -> Option<NodeAddress> {
            self.self_address.clone()
        }

        fn handle_connection_fault(&self, address: &NodeAddress) {
            self.faults.lock().unwrap().push(address.clone());
        }

        fn is_banned(&self, _reason: CloseReason, conn: ConnectionId) -> bool {
            self.banned.contains(&conn)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryPeerPool;
    use super::*;

    fn addr(n: u16) -> NodeAddress {
        NodeAddress::new(format!("peer{n}.example.net"), n)
    }

    #[test]
    fn test_sorted_by_recency() {
        let records = vec![
            PeerRecord { address: addr(1), last_seen: 10 },
            PeerRecord { address: addr(2), last_seen: 30 },
            PeerRecord { address: addr(3), last_seen: 20 },
        ];
        assert_eq!(sorted_by_recency(records), vec![addr(2), addr(3), addr(1)]);
    }

    #[test]
    fn test_filtered_excludes_self_and_earlier_lists() {
        let mut pool = MemoryPeerPool::with_seeds(vec![addr(1)]);
        pool.set_self(addr(9));

        let out = filtered(&pool, vec![addr(1), addr(2), addr(9)], &[addr(2)]);
        assert_eq!(out, vec![addr(1)]);
    }

    #[test]
    fn test_filtered_non_seed_excludes_seeds() {
        let pool = MemoryPeerPool::with_seeds(vec![addr(1), addr(2)]);
        let out = filtered_non_seed(&pool, vec![addr(1), addr(3), addr(4)], &[addr(4)]);
        assert_eq!(out, vec![addr(3)]);
    }
}
