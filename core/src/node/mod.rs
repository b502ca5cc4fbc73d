//! Node data model and registry.
//!
//! A [`Node`] is the canonical record of one device in the mesh. The
//! [`NodeRegistry`] owns the set of known nodes and is the only place that
//! mutates it; connection lists are changed exclusively through the topology
//! manager, which keeps them symmetric.

pub mod registry;

pub use registry::{NodeRegistry, UpsertOutcome};

use crate::platform::location::haversine_distance;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Opaque node identifier.
pub type NodeId = String;

/// Role a node plays in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeRole {
    Coordinator,
    Relay,
    Bridge,
    Endpoint,
}

impl NodeRole {
    /// Whether the node forwards traffic for others by default.
    pub fn is_forwarder(&self) -> bool {
        matches!(self, NodeRole::Coordinator | NodeRole::Relay | NodeRole::Bridge)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Messaging,
    Location,
    Relay,
    Emergency,
    Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnlineState {
    Online,
    Offline,
}

/// Emergency status a node advertises; ordered by urgency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EmergencyStatus {
    Normal,
    Alert,
    Emergency,
    Critical,
}

impl EmergencyStatus {
    pub fn is_elevated(&self) -> bool {
        *self >= EmergencyStatus::Emergency
    }
}

/// Where a node is: real coordinates or a simulated plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Position {
    Geo { lat: f64, lon: f64 },
    Planar { x: f64, y: f64 },
}

impl Position {
    /// Distance in metres (geo) or plane units (planar). `None` when the two
    /// positions live in different coordinate systems.
    pub fn distance_to(&self, other: &Position) -> Option<f64> {
        match (self, other) {
            (Position::Geo { lat: a, lon: b }, Position::Geo { lat: c, lon: d }) => {
                Some(haversine_distance(*a, *b, *c, *d))
            }
            (Position::Planar { x: a, y: b }, Position::Planar { x: c, y: d }) => {
                Some(((a - c).powi(2) + (b - d).powi(2)).sqrt())
            }
            _ => None,
        }
    }
}

/// One device in the mesh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub role: NodeRole,
    pub position: Option<Position>,
    /// 0–100
    pub signal_strength: f64,
    /// 0–100
    pub battery_level: f64,
    pub online: OnlineState,
    pub last_seen: u64,
    pub capabilities: BTreeSet<Capability>,
    pub emergency_status: EmergencyStatus,
    /// Peer ids this node has a live link to. Kept symmetric by the topology manager.
    pub connections: BTreeSet<NodeId>,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, role: NodeRole) -> Self {
        Self {
            id: id.into(),
            role,
            position: None,
            signal_strength: 100.0,
            battery_level: 100.0,
            online: OnlineState::Online,
            last_seen: 0,
            capabilities: BTreeSet::from([Capability::Messaging]),
            emergency_status: EmergencyStatus::Normal,
            connections: BTreeSet::new(),
        }
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_signal(mut self, signal: f64) -> Self {
        self.signal_strength = signal.clamp(0.0, 100.0);
        self
    }

    pub fn with_battery(mut self, battery: f64) -> Self {
        self.battery_level = battery.clamp(0.0, 100.0);
        self
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn with_last_seen(mut self, last_seen: u64) -> Self {
        self.last_seen = last_seen;
        self
    }

    pub fn is_online(&self) -> bool {
        self.online == OnlineState::Online
    }

    pub fn can_relay(&self) -> bool {
        self.capabilities.contains(&Capability::Relay) || self.role.is_forwarder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planar_distance() {
        let a = Position::Planar { x: 0.0, y: 0.0 };
        let b = Position::Planar { x: 3.0, y: 4.0 };
        assert_eq!(a.distance_to(&b), Some(5.0));
    }

    #[test]
    fn test_mixed_positions_have_no_distance() {
        let a = Position::Planar { x: 0.0, y: 0.0 };
        let b = Position::Geo { lat: 0.0, lon: 0.0 };
        assert_eq!(a.distance_to(&b), None);
    }

    #[test]
    fn test_builder_clamps_levels() {
        let node = Node::new("n", NodeRole::Endpoint)
            .with_signal(140.0)
            .with_battery(-3.0);
        assert_eq!(node.signal_strength, 100.0);
        assert_eq!(node.battery_level, 0.0);
        assert!(!node.can_relay());
    }

    #[test]
    fn test_emergency_status_ordering() {
        assert!(EmergencyStatus::Critical.is_elevated());
        assert!(EmergencyStatus::Emergency.is_elevated());
        assert!(!EmergencyStatus::Alert.is_elevated());
    }
}
