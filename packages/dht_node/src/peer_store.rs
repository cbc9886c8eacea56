use chrono::{DateTime, TimeDelta, Utc};
use krpc_encoding::NodeID;
use std::{
    collections::HashMap,
    net::SocketAddrV4,
};

/// Peers announced for each target info-hash, with the time they last
/// announced. Expired entries are pruned lazily whenever a target is
/// read; nothing sweeps the store eagerly.
pub struct PeerStore {
    peers: HashMap<NodeID, HashMap<SocketAddrV4, DateTime<Utc>>>,
    peer_timeout: TimeDelta,
}

impl PeerStore {
    pub fn new(peer_timeout: TimeDelta) -> PeerStore {
        PeerStore {
            peers: HashMap::new(),
            peer_timeout,
        }
    }

    /// Records that `peer` serves `target`. Re-announcing resets the
    /// entry's age.
    pub fn insert(&mut self, target: NodeID, peer: SocketAddrV4, now: DateTime<Utc>) {
        self.peers.entry(target).or_default().insert(peer, now);
    }

    /// The live peers for `target`, dropping whatever has aged out.
    pub fn get(&mut self, target: &NodeID, now: DateTime<Utc>) -> Vec<SocketAddrV4> {
        let Some(entries) = self.peers.get_mut(target) else {
            return Vec::new();
        };

        let timeout = self.peer_timeout;
        entries.retain(|_, announced| now - *announced < timeout);
        if entries.is_empty() {
            self.peers.remove(target);
            return Vec::new();
        }

        entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
