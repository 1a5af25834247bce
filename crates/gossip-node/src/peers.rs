//! Peer registry.
//!
//! Peers are "neighbours": UDP endpoints this node sends to directly. The
//! set only grows, by union with operator seeds and the source address of
//! every accepted peer packet.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use tracing::info;

/// Grow-only, duplicate-free set of peer endpoints.
#[derive(Default)]
pub struct PeerSet {
    peers: Mutex<Vec<SocketAddr>>,
}

impl PeerSet {
    /// Create a set seeded with the operator-supplied peers.
    pub fn new(seeds: Vec<SocketAddr>) -> Self {
        let set = Self::default();
        for seed in seeds {
            set.add(seed);
        }
        set
    }

    /// Union a peer into the set. Returns true if it was new.
    pub fn add(&self, addr: SocketAddr) -> bool {
        let mut peers = self.peers.lock();
        if peers.contains(&addr) {
            return false;
        }
        info!(peer = %addr, "New peer");
        peers.push(addr);
        true
    }

    /// A random peer, optionally excluding one address.
    pub fn random(&self, exclude: Option<SocketAddr>) -> Option<SocketAddr> {
        let peers = self.peers.lock();
        let candidates: Vec<SocketAddr> = peers
            .iter()
            .copied()
            .filter(|p| Some(*p) != exclude)
            .collect();
        candidates.choose(&mut rand::thread_rng()).copied()
    }

    /// Copy of all peers in insertion order.
    pub fn all(&self) -> Vec<SocketAddr> {
        self.peers.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_add_deduplicates() {
        let set = PeerSet::new(vec![addr(1), addr(2)]);
        assert!(!set.add(addr(1)));
        assert!(set.add(addr(3)));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_random_respects_exclusion() {
        let set = PeerSet::new(vec![addr(1), addr(2)]);
        for _ in 0..32 {
            let picked = set.random(Some(addr(1))).unwrap();
            assert_eq!(picked, addr(2));
        }
        // Excluding the only peer leaves nothing.
        let lone = PeerSet::new(vec![addr(9)]);
        assert!(lone.random(Some(addr(9))).is_none());
    }
}
