// Peer discovery source

use crate::node::Node;
use async_trait::async_trait;
use parking_lot::Mutex;

/// Anything that can report nearby nodes: mDNS, BLE scans, a DHT walk.
#[async_trait]
pub trait PeerDiscoverySource: Send + Sync {
    async fn discover(&self) -> Vec<Node>;
}

/// Returns whatever was queued with [`InMemoryDiscovery::announce`], once.
#[derive(Debug, Default)]
pub struct InMemoryDiscovery {
    pending: Mutex<Vec<Node>>,
}

impl InMemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announce(&self, node: Node) {
        self.pending.lock().push(node);
    }
}

#[async_trait]
impl PeerDiscoverySource for InMemoryDiscovery {
    async fn discover(&self) -> Vec<Node> {
        std::mem::take(&mut *self.pending.lock())
    }
}
