// Message types: what the router moves between nodes

use crate::node::NodeId;
use crate::{MeshError, Result};
use serde::{Deserialize, Serialize};

/// How a message is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Unicast,
    Multicast,
    Broadcast,
    Emergency,
}

/// Ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Normal,
    High,
    Emergency,
}

/// Delivery status of a message. Everything but `Pending` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
    Expired,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

/// A routed mesh message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshMessage {
    /// Unique message ID (UUID v4)
    pub id: String,
    pub kind: MessageKind,
    pub priority: Priority,
    pub payload: Vec<u8>,
    pub source: NodeId,
    /// Empty for broadcasts.
    pub destinations: Vec<NodeId>,
    /// Nodes that have forwarded this message, in order.
    pub route: Vec<NodeId>,
    /// Remaining forwards.
    pub ttl: u32,
    /// TTL the message started with; retries restart from it.
    pub initial_ttl: u32,
    /// Creation time, ms since epoch
    pub timestamp: u64,
    pub status: DeliveryStatus,
    pub retry_count: u32,
}

impl MeshMessage {
    pub fn new(
        kind: MessageKind,
        priority: Priority,
        source: impl Into<NodeId>,
        destinations: Vec<NodeId>,
        payload: Vec<u8>,
        ttl: u32,
        now: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            priority,
            payload,
            source: source.into(),
            destinations,
            route: Vec::new(),
            ttl,
            initial_ttl: ttl,
            timestamp: now,
            status: DeliveryStatus::Pending,
            retry_count: 0,
        }
    }

    pub fn unicast(source: &str, destination: &str, payload: Vec<u8>, ttl: u32, now: u64) -> Self {
        Self::new(
            MessageKind::Unicast,
            Priority::Normal,
            source,
            vec![destination.to_string()],
            payload,
            ttl,
            now,
        )
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn is_emergency(&self) -> bool {
        self.kind == MessageKind::Emergency || self.priority == Priority::Emergency
    }

    pub fn has_visited(&self, node: &str) -> bool {
        self.route.iter().any(|n| n == node)
    }

    pub fn is_addressed_to(&self, node: &str) -> bool {
        self.destinations.iter().any(|n| n == node)
    }

    /// Forwards performed so far.
    pub fn hop_count(&self) -> usize {
        self.route.len().saturating_sub(1)
    }

    /// Move to a new status. Leaving a terminal status is refused.
    pub fn set_status(&mut self, status: DeliveryStatus) -> Result<()> {
        if self.status.is_terminal() && status != self.status {
            return Err(MeshError::Invalid(format!(
                "message {} already {:?}",
                self.id, self.status
            )));
        }
        self.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_are_final() {
        let mut msg = MeshMessage::unicast("a", "b", vec![], 5, 0);
        assert_eq!(msg.status, DeliveryStatus::Pending);
        msg.set_status(DeliveryStatus::Expired).unwrap();
        assert!(msg.set_status(DeliveryStatus::Delivered).is_err());
        assert!(msg.set_status(DeliveryStatus::Pending).is_err());
        msg.set_status(DeliveryStatus::Expired).unwrap();
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Emergency > Priority::High);
        assert!(Priority::Low < Priority::Normal);
    }

    #[test]
    fn test_emergency_detection() {
        let msg = MeshMessage::unicast("a", "b", vec![], 5, 0);
        assert!(!msg.is_emergency());
        assert!(msg.clone().with_priority(Priority::Emergency).is_emergency());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = MeshMessage::unicast("a", "b", vec![], 5, 0);
        let b = MeshMessage::unicast("a", "b", vec![], 5, 0);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 36);
    }
}
