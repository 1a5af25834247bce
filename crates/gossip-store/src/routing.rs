//! DSDV-style next-hop table.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::debug;

/// Maps an origin name to the peer a fresh rumor from it last arrived from.
///
/// Entries are only written when a rumor is admitted as new, so the table
/// never points at a peer that merely replayed stale traffic.
#[derive(Default)]
pub struct RoutingTable {
    routes: Mutex<HashMap<String, SocketAddr>>,
}

impl RoutingTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `relay` is the freshest hop toward `origin`.
    pub fn update(&self, origin: &str, relay: SocketAddr) {
        let mut routes = self.routes.lock();
        let changed = routes.get(origin) != Some(&relay);
        if changed {
            debug!(origin = %origin, relay = %relay, "Next hop updated");
            routes.insert(origin.to_string(), relay);
        }
    }

    /// Next hop toward a destination, if one is known.
    pub fn next_hop(&self, destination: &str) -> Option<SocketAddr> {
        self.routes.lock().get(destination).copied()
    }

    /// All known destinations, sorted.
    pub fn origins(&self) -> Vec<String> {
        let mut origins: Vec<String> = self.routes.lock().keys().cloned().collect();
        origins.sort();
        origins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_update_and_lookup() {
        let table = RoutingTable::new();
        assert_eq!(table.next_hop("alice"), None);

        table.update("alice", addr(5000));
        assert_eq!(table.next_hop("alice"), Some(addr(5000)));

        // A fresher rumor from a different relay overwrites.
        table.update("alice", addr(5001));
        assert_eq!(table.next_hop("alice"), Some(addr(5001)));
    }

    #[test]
    fn test_origins_sorted() {
        let table = RoutingTable::new();
        table.update("carol", addr(1));
        table.update("alice", addr(2));
        assert_eq!(table.origins(), vec!["alice".to_string(), "carol".to_string()]);
    }
}
