// Direct one-hop transport

use crate::node::NodeId;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};

/// One-hop link layer the engine sends through.
pub trait Transport: Send + Sync {
    /// Hand `payload` to a directly connected peer. `false` if it could not.
    fn send_direct(&self, node: &NodeId, payload: &[u8]) -> bool;

    fn connect(&self, node: &NodeId) -> bool;

    fn disconnect(&self, node: &NodeId);

    /// Peers with a currently open link.
    fn connected_peers(&self) -> Vec<NodeId>;
}

/// Loopback transport that records everything it is asked to send.
///
/// Peers listed as unreachable refuse connections and sends.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    connected: Mutex<BTreeSet<NodeId>>,
    unreachable: Mutex<HashSet<NodeId>>,
    sent: Mutex<Vec<(NodeId, Vec<u8>)>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, node: &str, unreachable: bool) {
        let mut set = self.unreachable.lock();
        if unreachable {
            set.insert(node.to_string());
            self.connected.lock().remove(node);
        } else {
            set.remove(node);
        }
    }

    /// Everything sent so far, oldest first.
    pub fn sent(&self) -> Vec<(NodeId, Vec<u8>)> {
        self.sent.lock().clone()
    }

    pub fn sent_to(&self, node: &str) -> usize {
        self.sent.lock().iter().filter(|(n, _)| n == node).count()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }
}

impl Transport for InMemoryTransport {
    fn send_direct(&self, node: &NodeId, payload: &[u8]) -> bool {
        if self.unreachable.lock().contains(node) {
            tracing::trace!("In-memory send to {} refused", node);
            return false;
        }
        self.sent.lock().push((node.clone(), payload.to_vec()));
        true
    }

    fn connect(&self, node: &NodeId) -> bool {
        if self.unreachable.lock().contains(node) {
            return false;
        }
        self.connected.lock().insert(node.clone());
        true
    }

    fn disconnect(&self, node: &NodeId) {
        self.connected.lock().remove(node);
    }

    fn connected_peers(&self) -> Vec<NodeId> {
        self.connected.lock().iter().cloned().collect()
    }
}
