//! A minimal peer manager: just enough to answer `server.add_peer` and
//! `server.peers.subscribe` (SPEC_FULL.md supplemented feature #4). Full
//! peer discovery gossip is still an external collaborator per spec.md §1;
//! this only remembers what other servers have announced themselves to us.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct PeerManager {
    peers: HashMap<String, serde_json::Value>,
}

impl Default for PeerManager {
    fn default() -> Self {
        PeerManager {
            peers: HashMap::new(),
        }
    }
}

impl PeerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `features` under its advertised hostname, rejecting anything
    /// that doesn't even carry one. Mirrors `PeerManager.add` bailing out on
    /// malformed peer announcements rather than raising.
    pub fn add(&mut self, features: serde_json::Value) -> bool {
        let host = match features.get("host").and_then(|v| v.as_str()) {
            Some(h) => h.to_string(),
            None => return false,
        };
        self.peers.insert(host, features);
        true
    }

    pub fn list(&self) -> Vec<serde_json::Value> {
        self.peers.values().cloned().collect()
    }
}
