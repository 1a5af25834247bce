//! Rumor and private message storage.
//!
//! Rumors are kept per origin as a dense id-prefix starting at 1: a rumor is
//! admitted only when its id is exactly the next one expected from its
//! origin. Duplicates are idempotent, gaps are discarded. The vector clock
//! is derived from the log rather than stored.

use gossip_proto::{PrivateMessage, RumorMessage, StatusEntry, StatusPacket};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Outcome of comparing the local clock against a remote status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusDiff {
    /// We hold a rumor the remote lacks; this is the canonical one to send
    /// (smallest missing origin lexicographically, then smallest id).
    HaveRumor(RumorMessage),
    /// The remote holds something we lack.
    RemoteHasNew,
    /// Both sides know the same rumors.
    InSync,
}

#[derive(Default)]
struct StoreInner {
    /// Per-origin rumor log; index `i` holds id `i + 1`.
    rumors: HashMap<String, Vec<RumorMessage>>,
    /// Private messages addressed to this node, in arrival order.
    privates: Vec<PrivateMessage>,
}

/// Thread-safe store of rumors and private messages.
#[derive(Default)]
pub struct MessageStore {
    inner: Mutex<StoreInner>,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id still needed from an origin (1 if none seen).
    pub fn next_id(&self, origin: &str) -> u32 {
        let inner = self.inner.lock();
        inner.rumors.get(origin).map_or(1, |log| log.len() as u32 + 1)
    }

    /// Would this rumor be admitted as new right now?
    pub fn is_new(&self, rumor: &RumorMessage) -> bool {
        self.next_id(&rumor.origin) == rumor.id
    }

    /// Admit a rumor. Returns true if it extended the origin's prefix;
    /// duplicates and out-of-order rumors are rejected without effect.
    pub fn add_rumor(&self, rumor: RumorMessage) -> bool {
        let mut inner = self.inner.lock();
        let log = inner.rumors.entry(rumor.origin.clone()).or_default();
        let next = log.len() as u32 + 1;
        if rumor.id != next {
            debug!(
                origin = %rumor.origin,
                id = rumor.id,
                expected = next,
                "Rumor out of order, discarded"
            );
            return false;
        }
        log.push(rumor);
        true
    }

    /// Current vector clock, one entry per known origin, sorted by origin.
    pub fn status(&self) -> StatusPacket {
        let inner = self.inner.lock();
        let mut want: Vec<StatusEntry> = inner
            .rumors
            .iter()
            .map(|(origin, log)| StatusEntry {
                identifier: origin.clone(),
                next_id: log.len() as u32 + 1,
            })
            .collect();
        want.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        StatusPacket { want }
    }

    /// Compare against a remote status.
    ///
    /// "We have something new" always wins over "remote has something new";
    /// among several missing rumors the smallest `(origin, id)` is chosen,
    /// origins ordered lexicographically.
    pub fn diff(&self, remote: &StatusPacket) -> StatusDiff {
        let inner = self.inner.lock();

        let mut origins: Vec<&String> = inner.rumors.keys().collect();
        origins.sort();
        for origin in origins {
            let log = &inner.rumors[origin];
            let local_next = log.len() as u32 + 1;
            let remote_next = remote.next_id_for(origin);
            if local_next > remote_next {
                // Smallest id the remote is missing.
                return StatusDiff::HaveRumor(log[(remote_next - 1) as usize].clone());
            }
        }

        for entry in &remote.want {
            let local_next = inner
                .rumors
                .get(&entry.identifier)
                .map_or(1, |log| log.len() as u32 + 1);
            if entry.next_id > local_next {
                return StatusDiff::RemoteHasNew;
            }
        }

        StatusDiff::InSync
    }

    /// Store a private message addressed to this node.
    pub fn add_private(&self, message: PrivateMessage) {
        self.inner.lock().privates.push(message);
    }

    /// Copy of all received private messages.
    pub fn private_messages(&self) -> Vec<PrivateMessage> {
        self.inner.lock().privates.clone()
    }

    /// Copy of all rumors, grouped per origin in id order.
    pub fn rumors(&self) -> Vec<RumorMessage> {
        let inner = self.inner.lock();
        let mut origins: Vec<&String> = inner.rumors.keys().collect();
        origins.sort();
        origins
            .into_iter()
            .flat_map(|origin| inner.rumors[origin].iter().cloned())
            .collect()
    }

    /// Look up a specific rumor.
    pub fn rumor(&self, origin: &str, id: u32) -> Option<RumorMessage> {
        let inner = self.inner.lock();
        inner
            .rumors
            .get(origin)
            .and_then(|log| log.get(id.checked_sub(1)? as usize))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rumor(origin: &str, id: u32, text: &str) -> RumorMessage {
        RumorMessage {
            origin: origin.to_string(),
            id,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_dense_prefix_admission() {
        let store = MessageStore::new();

        assert!(store.add_rumor(rumor("alice", 1, "a")));
        assert!(store.add_rumor(rumor("alice", 2, "b")));
        // Gap beyond the prefix is discarded.
        assert!(!store.add_rumor(rumor("alice", 4, "d")));
        assert_eq!(store.next_id("alice"), 3);
    }

    #[test]
    fn test_duplicate_rumor_is_idempotent() {
        let store = MessageStore::new();
        assert!(store.add_rumor(rumor("alice", 1, "a")));

        let status_before = store.status();
        assert!(!store.add_rumor(rumor("alice", 1, "a")));
        assert_eq!(store.status(), status_before);
        assert_eq!(store.rumors().len(), 1);
    }

    #[test]
    fn test_status_reflects_prefix() {
        let store = MessageStore::new();
        store.add_rumor(rumor("bob", 1, "x"));
        store.add_rumor(rumor("alice", 1, "y"));
        store.add_rumor(rumor("alice", 2, "z"));

        let status = store.status();
        assert_eq!(status.want.len(), 2);
        assert_eq!(status.want[0].identifier, "alice");
        assert_eq!(status.want[0].next_id, 3);
        assert_eq!(status.want[1].identifier, "bob");
        assert_eq!(status.want[1].next_id, 2);
    }

    #[test]
    fn test_diff_prefers_having_something_new() {
        let store = MessageStore::new();
        store.add_rumor(rumor("alice", 1, "a"));

        // Remote knows nothing about alice but is ahead on carol: sending
        // our rumor still wins.
        let remote = StatusPacket {
            want: vec![StatusEntry {
                identifier: "carol".to_string(),
                next_id: 5,
            }],
        };
        match store.diff(&remote) {
            StatusDiff::HaveRumor(r) => {
                assert_eq!(r.origin, "alice");
                assert_eq!(r.id, 1);
            }
            other => panic!("unexpected diff: {:?}", other),
        }
    }

    #[test]
    fn test_diff_tie_break_smallest_origin_then_id() {
        let store = MessageStore::new();
        store.add_rumor(rumor("bob", 1, "b1"));
        store.add_rumor(rumor("alice", 1, "a1"));
        store.add_rumor(rumor("alice", 2, "a2"));

        // Remote is missing everything: alice id 1 must be chosen.
        match store.diff(&StatusPacket::default()) {
            StatusDiff::HaveRumor(r) => {
                assert_eq!(r.origin, "alice");
                assert_eq!(r.id, 1);
            }
            other => panic!("unexpected diff: {:?}", other),
        }
    }

    #[test]
    fn test_diff_remote_has_new_and_in_sync() {
        let store = MessageStore::new();
        store.add_rumor(rumor("alice", 1, "a"));

        let ahead = StatusPacket {
            want: vec![StatusEntry {
                identifier: "alice".to_string(),
                next_id: 3,
            }],
        };
        assert_eq!(store.diff(&ahead), StatusDiff::RemoteHasNew);

        let level = StatusPacket {
            want: vec![StatusEntry {
                identifier: "alice".to_string(),
                next_id: 2,
            }],
        };
        assert_eq!(store.diff(&level), StatusDiff::InSync);
    }

    #[test]
    fn test_private_log() {
        let store = MessageStore::new();
        store.add_private(PrivateMessage {
            origin: "alice".to_string(),
            id: 0,
            text: "psst".to_string(),
            destination: "bob".to_string(),
            hop_limit: 7,
        });
        let log = store.private_messages();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].text, "psst");
    }
}
