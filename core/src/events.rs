// Event bus: typed, fire-and-forget notifications for UI and telemetry.
//
// Publishing never blocks and never fails: a slow subscriber lags and loses
// the oldest events, a missing subscriber simply drops them.

use crate::message::DeliveryStatus;
use crate::node::NodeId;
use crate::routing::Route;
use crate::simulation::SimulationMetrics;
use crate::topology::TopologyShape;
use tokio::sync::broadcast;

/// Default per-subscriber backlog.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    NodeJoined { node_id: NodeId },
    NodeLeft { node_id: NodeId },
    RouteDiscovered { route: Route },
    EmergencyRouteEstablished { route: Route },
    RouteExpired { destination: NodeId, next_hop: NodeId },
    MessageRouted { message_id: String, status: DeliveryStatus, targets: Vec<NodeId> },
    NetworkFormed { network_id: String },
    NetworkDissolved { network_id: String },
    TopologyChanged { network_id: String, shape: TopologyShape },
    PartitionDetected { components: Vec<Vec<NodeId>> },
    BroadcastSent { broadcast_id: String },
    BroadcastReceived { broadcast_id: String },
    BroadcastAcknowledged { broadcast_id: String, node_id: NodeId },
    BroadcastExpired { broadcast_id: String },
    BroadcastCancelled { broadcast_id: String },
    EmergencyStatusChanged { active: bool },
    SimulationTick { tick: u64 },
    MetricsUpdated { metrics: SimulationMetrics },
}

/// Cloneable handle onto one broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MeshEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish without waiting; returns how many subscribers saw it.
    pub fn publish(&self, event: MeshEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
