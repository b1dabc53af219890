//! Known peers
//!
//! The directory holds the peer set produced by the last successful
//! discovery cycle. A cycle replaces the set as a whole: readers either see
//! the previous list or the new one, never a mix.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A neighbour reachable through the transport
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerNode {
    /// Node identifier, as used by `send_to`
    pub node_id: String,
    /// Transport address, opaque to the protocol
    pub address: String,
}

impl PeerNode {
    /// Create a peer record
    pub fn new(node_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for PeerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node_id, self.address)
    }
}

/// Peer set with atomic whole-list replacement
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: RwLock<Arc<Vec<PeerNode>>>,
}

impl PeerDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the peer set
    ///
    /// Duplicate node ids keep their first occurrence.
    pub fn replace(&self, peers: Vec<PeerNode>) {
        let mut unique: Vec<PeerNode> = Vec::with_capacity(peers.len());
        for peer in peers {
            if !unique.iter().any(|p| p.node_id == peer.node_id) {
                unique.push(peer);
            }
        }

        debug!(count = unique.len(), "Replacing peer directory");
        *self.peers.write() = Arc::new(unique);
    }

    /// Current peer set
    pub fn snapshot(&self) -> Arc<Vec<PeerNode>> {
        Arc::clone(&self.peers.read())
    }

    /// Node ids of the current peer set
    pub fn ids(&self) -> Vec<String> {
        self.snapshot().iter().map(|p| p.node_id.clone()).collect()
    }

    /// Look a peer up by node id
    pub fn find(&self, node_id: &str) -> Option<PeerNode> {
        self.snapshot().iter().find(|p| p.node_id == node_id).cloned()
    }

    /// Number of known peers
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Check if no peers are known
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
