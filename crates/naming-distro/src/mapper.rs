//! Deterministic peer ownership for the distro protocol (§4.B).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

/// Maps a service name to the peer responsible for it.
///
/// Peer membership is supplied externally via [`DistroMapper::update_peers`]
/// and read as a single atomic snapshot by every lookup, so `responsible`
/// and `map_srv` never observe a torn membership list mid-update.
pub struct DistroMapper {
    self_id: String,
    peers: RwLock<Vec<String>>,
}

impl DistroMapper {
    /// `peers` need not be pre-sorted; it is sorted internally so that
    /// every node computes the same ordering regardless of discovery order.
    pub fn new(self_id: impl Into<String>, peers: Vec<String>) -> Self {
        let mut sorted = peers;
        sorted.sort();
        Self {
            self_id: self_id.into(),
            peers: RwLock::new(sorted),
        }
    }

    pub fn update_peers(&self, mut peers: Vec<String>) {
        peers.sort();
        let mut guard = self.peers.write().expect("peer list lock poisoned");
        *guard = peers;
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers.read().expect("peer list lock poisoned").clone()
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// The peer identity responsible for `service_name`.
    pub fn map_srv(&self, service_name: &str) -> Option<String> {
        let peers = self.peers.read().expect("peer list lock poisoned");
        if peers.is_empty() {
            return None;
        }
        let index = (stable_hash(service_name) as usize) % peers.len();
        Some(peers[index].clone())
    }

    /// True if this node owns `service_name`.
    pub fn responsible(&self, service_name: &str) -> bool {
        self.map_srv(service_name)
            .is_some_and(|owner| owner == self.self_id)
    }
}

/// A stable 32-bit hash of `s`. Deterministic across processes built from
/// the same toolchain, which is sufficient here: every peer in a cluster
/// runs the same binary.
fn stable_hash(s: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    (hasher.finish() & 0xffff_ffff) as u32
}
