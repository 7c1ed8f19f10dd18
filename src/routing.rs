//! K-bucket routing table.
//!
//! Known peers are kept in 160 buckets, one per possible length of the
//! common prefix between the local identifier and the peer's. Bucket `i`
//! holds peers whose XOR distance to the local id has its first set bit at
//! position `i`, so low-numbered buckets cover the far half of the keyspace
//! and high-numbered buckets the immediate neighborhood.
//!
//! Each bucket holds up to [`K`] peers ordered oldest-first. Re-pushing a
//! known id refreshes its position (and address); pushing into a full
//! bucket evicts the oldest entry. The local identifier is never stored.

use std::collections::VecDeque;
use std::net::SocketAddr;

use parking_lot::RwLock;

use crate::id::{Id, ID_BITS};

/// Bucket capacity, and the number of peers returned to a FIND_PEER request.
pub const K: usize = 20;

const BUCKET_COUNT: usize = ID_BITS;

/// A peer of the network: an identifier and the UDP endpoint it answers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Peer {
    pub id: Id,
    pub addr: SocketAddr,
}

impl Peer {
    pub fn new(id: Id, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

#[derive(Debug, Default)]
struct Bucket {
    peers: VecDeque<Peer>,
}

impl Bucket {
    fn push(&mut self, peer: Peer) {
        if let Some(pos) = self.peers.iter().position(|p| p.id == peer.id) {
            self.peers.remove(pos);
            self.peers.push_back(peer);
            return;
        }

        if self.peers.len() == K {
            self.peers.pop_front();
        }
        self.peers.push_back(peer);
    }
}

/// The set of peers this node can route through, ordered by XOR distance.
pub struct RoutingTable {
    local_id: Id,
    buckets: Vec<RwLock<Bucket>>,
}

impl RoutingTable {
    pub fn new(local_id: Id) -> Self {
        let buckets = (0..BUCKET_COUNT)
            .map(|_| RwLock::new(Bucket::default()))
            .collect();

        Self { local_id, buckets }
    }

    pub fn local_id(&self) -> &Id {
        &self.local_id
    }

    /// Records a peer. Pushing the local id is a no-op; pushing a known id
    /// refreshes its entry, so inserts are idempotent per `(id, addr)`.
    pub fn push(&self, id: Id, addr: SocketAddr) {
        if id == self.local_id {
            return;
        }

        let idx = self.bucket_index(&id);
        self.buckets[idx].write().push(Peer::new(id, addr));
    }

    fn bucket_index(&self, id: &Id) -> usize {
        self.local_id.distance(id).leading_zeros().min(BUCKET_COUNT - 1)
    }

    /// All known peers in ascending XOR distance from `target`. Seeds the
    /// candidate set of an iterative lookup.
    pub fn find(&self, target: &Id) -> Vec<Peer> {
        let mut peers: Vec<(Id, Peer)> = Vec::new();

        for bucket in &self.buckets {
            let bucket = bucket.read();
            for peer in &bucket.peers {
                peers.push((peer.id.distance(target), *peer));
            }
        }

        peers.sort_by(|a, b| a.0.cmp(&b.0));
        peers.into_iter().map(|(_, p)| p).collect()
    }

    /// Up to `count` peers in ascending XOR distance from `target`.
    pub fn closest(&self, target: &Id, count: usize) -> Vec<Peer> {
        let mut peers = self.find(target);
        peers.truncate(count);
        peers
    }

    /// Indices of buckets currently holding at least one peer.
    pub fn occupied_buckets(&self) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.read().peers.is_empty())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn peer_count(&self) -> usize {
        self.buckets.iter().map(|b| b.read().peers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.peer_count() == 0
    }
}
