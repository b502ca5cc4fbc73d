// Node registry: canonical record of local and remote nodes.
//
// Copy-on-write: readers take an `Arc` snapshot of the whole map; writers
// clone it, apply their change and publish the new map under the write lock.

use super::{Capability, Node, NodeId, NodeRole, OnlineState};
use crate::events::{EventBus, MeshEvent};
use crate::{MeshError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result of merging a remote node record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First time this id was seen.
    Joined,
    /// Known node came back online.
    Rejoined,
    /// Known node, attributes refreshed.
    Updated,
}

pub struct NodeRegistry {
    nodes: RwLock<Arc<HashMap<NodeId, Node>>>,
    local_id: RwLock<Option<NodeId>>,
    /// Bumped on every change to links, online state or position.
    topology_version: AtomicU64,
    events: EventBus,
}

impl NodeRegistry {
    pub fn new(events: EventBus) -> Self {
        Self {
            nodes: RwLock::new(Arc::new(HashMap::new())),
            local_id: RwLock::new(None),
            topology_version: AtomicU64::new(0),
            events,
        }
    }

    /// Current immutable view of every known node.
    pub fn snapshot(&self) -> Arc<HashMap<NodeId, Node>> {
        self.nodes.read().clone()
    }

    pub fn topology_version(&self) -> u64 {
        self.topology_version.load(Ordering::SeqCst)
    }

    pub fn local_id(&self) -> Option<NodeId> {
        self.local_id.read().clone()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.read().contains_key(id)
    }

    pub fn get(&self, id: &str) -> Result<Node> {
        self.nodes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| MeshError::NotFound(format!("node {}", id)))
    }

    /// Online nodes ordered by id.
    pub fn online_nodes(&self) -> Vec<Node> {
        let snapshot = self.snapshot();
        let mut nodes: Vec<Node> = snapshot.values().filter(|n| n.is_online()).cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Create (or replace) the record describing this device.
    pub fn register_local_node(
        &self,
        id: impl Into<NodeId>,
        role: NodeRole,
        capabilities: impl IntoIterator<Item = Capability>,
        now: u64,
    ) -> Node {
        let node = Node::new(id, role)
            .with_capabilities(capabilities)
            .with_last_seen(now);
        let stored = node.clone();
        self.mutate(|nodes| {
            let connections = nodes
                .get(&stored.id)
                .map(|n| n.connections.clone())
                .unwrap_or_default();
            let mut stored = stored;
            stored.connections = connections;
            nodes.insert(stored.id.clone(), stored);
        });
        *self.local_id.write() = Some(node.id.clone());
        self.bump_version();
        tracing::info!("Registered local node {} as {:?}", node.id, role);
        self.events.publish(MeshEvent::NodeJoined {
            node_id: node.id.clone(),
        });
        node
    }

    /// Merge a remote node record. Existing links are kept; links are owned
    /// by the topology manager, so any list on the incoming record is ignored.
    pub fn upsert_remote_node(&self, node: Node) -> UpsertOutcome {
        let id = node.id.clone();
        let (outcome, structural) = self.mutate(|nodes| match nodes.get_mut(&node.id) {
            Some(existing) => {
                let was_online = existing.is_online();
                let moved = existing.position != node.position;
                let connections = std::mem::take(&mut existing.connections);
                *existing = node;
                existing.connections = connections;
                let outcome = if !was_online && existing.is_online() {
                    UpsertOutcome::Rejoined
                } else {
                    UpsertOutcome::Updated
                };
                (outcome, moved || was_online != existing.is_online())
            }
            None => {
                let mut node = node;
                node.connections.clear();
                nodes.insert(node.id.clone(), node);
                (UpsertOutcome::Joined, true)
            }
        });
        if structural {
            self.bump_version();
        }
        match outcome {
            UpsertOutcome::Joined | UpsertOutcome::Rejoined => {
                tracing::debug!("Node {} joined ({:?})", id, outcome);
                self.events.publish(MeshEvent::NodeJoined { node_id: id });
            }
            UpsertOutcome::Updated => {}
        }
        outcome
    }

    pub fn mark_offline(&self, id: &str, now: u64) -> Result<()> {
        self.set_online_state(id, OnlineState::Offline, now)
    }

    pub fn mark_online(&self, id: &str, now: u64) -> Result<()> {
        self.set_online_state(id, OnlineState::Online, now)
    }

    fn set_online_state(&self, id: &str, state: OnlineState, now: u64) -> Result<()> {
        let changed = self.mutate(|nodes| {
            let node = nodes
                .get_mut(id)
                .ok_or_else(|| MeshError::NotFound(format!("node {}", id)))?;
            let changed = node.online != state;
            node.online = state;
            if state == OnlineState::Online {
                node.last_seen = now;
            }
            Ok::<bool, MeshError>(changed)
        })?;
        if changed {
            self.bump_version();
            let node_id = id.to_string();
            match state {
                OnlineState::Offline => {
                    tracing::debug!("Node {} went offline", id);
                    self.events.publish(MeshEvent::NodeLeft { node_id });
                }
                OnlineState::Online => {
                    tracing::debug!("Node {} came back online", id);
                    self.events.publish(MeshEvent::NodeJoined { node_id });
                }
            }
        }
        Ok(())
    }

    /// Mutate non-link attributes of one node (battery, signal, status, position).
    pub fn update<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Node),
    {
        let structural = self.mutate(|nodes| {
            let node = nodes
                .get_mut(id)
                .ok_or_else(|| MeshError::NotFound(format!("node {}", id)))?;
            let connections = node.connections.clone();
            let position = node.position;
            let online = node.online;
            f(node);
            node.id = id.to_string();
            node.connections = connections;
            Ok::<bool, MeshError>(node.position != position || node.online != online)
        })?;
        if structural {
            self.bump_version();
        }
        Ok(())
    }

    /// Remove every remote node not seen for `stale_after_ms`. The local node
    /// is never pruned. Links to removed nodes are torn down in the same update.
    pub fn prune(&self, stale_after_ms: u64, now: u64) -> Vec<NodeId> {
        let local = self.local_id();
        let removed = self.mutate(|nodes| {
            let mut stale: Vec<NodeId> = nodes
                .values()
                .filter(|n| Some(&n.id) != local.as_ref())
                .filter(|n| now.saturating_sub(n.last_seen) > stale_after_ms)
                .map(|n| n.id.clone())
                .collect();
            stale.sort();
            for id in &stale {
                nodes.remove(id);
            }
            for node in nodes.values_mut() {
                for id in &stale {
                    node.connections.remove(id);
                }
            }
            stale
        });
        if !removed.is_empty() {
            self.bump_version();
            tracing::info!("Pruned {} stale nodes", removed.len());
            for id in &removed {
                self.events.publish(MeshEvent::NodeLeft {
                    node_id: id.clone(),
                });
            }
        }
        removed
    }

    // ------------------------------------------------------------------------
    // Link mutation, reserved for the topology manager
    // ------------------------------------------------------------------------

    pub(crate) fn link(&self, a: &str, b: &str) -> Result<bool> {
        if a == b {
            return Err(MeshError::Invalid(format!("self-link on {}", a)));
        }
        let added = self.mutate(|nodes| {
            if !nodes.contains_key(a) {
                return Err(MeshError::NotFound(format!("node {}", a)));
            }
            if !nodes.contains_key(b) {
                return Err(MeshError::NotFound(format!("node {}", b)));
            }
            let mut added = false;
            if let Some(node) = nodes.get_mut(a) {
                added |= node.connections.insert(b.to_string());
            }
            if let Some(node) = nodes.get_mut(b) {
                added |= node.connections.insert(a.to_string());
            }
            Ok(added)
        })?;
        if added {
            self.bump_version();
        }
        Ok(added)
    }

    pub(crate) fn unlink(&self, a: &str, b: &str) -> bool {
        let removed = self.mutate(|nodes| {
            let mut removed = false;
            if let Some(node) = nodes.get_mut(a) {
                removed |= node.connections.remove(b);
            }
            if let Some(node) = nodes.get_mut(b) {
                removed |= node.connections.remove(a);
            }
            removed
        });
        if removed {
            self.bump_version();
        }
        removed
    }

    /// Drop every link of `id` on both sides.
    pub(crate) fn detach(&self, id: &str) -> Vec<NodeId> {
        let peers = self.mutate(|nodes| {
            let peers: Vec<NodeId> = nodes
                .get_mut(id)
                .map(|n| std::mem::take(&mut n.connections).into_iter().collect())
                .unwrap_or_default();
            for peer in &peers {
                if let Some(node) = nodes.get_mut(peer) {
                    node.connections.remove(id);
                }
            }
            peers
        });
        if !peers.is_empty() {
            self.bump_version();
        }
        peers
    }

    /// Replace the whole map with a restored set of nodes.
    pub(crate) fn replace_all(&self, nodes: HashMap<NodeId, Node>) {
        *self.nodes.write() = Arc::new(nodes);
        self.bump_version();
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut HashMap<NodeId, Node>) -> R) -> R {
        let mut guard = self.nodes.write();
        let mut next = HashMap::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    fn bump_version(&self) {
        self.topology_version.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{EmergencyStatus, Position};

    fn registry() -> NodeRegistry {
        NodeRegistry::new(EventBus::new())
    }

    #[test]
    fn test_register_local_node() {
        let reg = registry();
        let node = reg.register_local_node("local", NodeRole::Relay, [Capability::Relay], 10);
        assert_eq!(reg.local_id().as_deref(), Some("local"));
        assert_eq!(node.last_seen, 10);
        assert!(reg.get("local").unwrap().capabilities.contains(&Capability::Relay));
    }

    #[test]
    fn test_unknown_node_is_not_found() {
        let reg = registry();
        assert!(matches!(reg.get("ghost"), Err(MeshError::NotFound(_))));
        assert!(matches!(reg.mark_offline("ghost", 0), Err(MeshError::NotFound(_))));
    }

    #[test]
    fn test_upsert_outcomes_and_events() {
        let reg = registry();
        let mut rx = reg.events.subscribe();
        assert_eq!(
            reg.upsert_remote_node(Node::new("a", NodeRole::Endpoint)),
            UpsertOutcome::Joined
        );
        assert_eq!(
            reg.upsert_remote_node(Node::new("a", NodeRole::Endpoint).with_battery(50.0)),
            UpsertOutcome::Updated
        );
        reg.mark_offline("a", 5).unwrap();
        assert_eq!(
            reg.upsert_remote_node(Node::new("a", NodeRole::Endpoint)),
            UpsertOutcome::Rejoined
        );
        let kinds: Vec<MeshEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(kinds.len(), 3);
        assert!(matches!(kinds[1], MeshEvent::NodeLeft { .. }));
    }

    #[test]
    fn test_upsert_ignores_remote_connection_lists() {
        let reg = registry();
        let mut node = Node::new("a", NodeRole::Endpoint);
        node.connections.insert("phantom".into());
        reg.upsert_remote_node(node);
        assert!(reg.get("a").unwrap().connections.is_empty());
    }

    #[test]
    fn test_links_are_symmetric() {
        let reg = registry();
        reg.upsert_remote_node(Node::new("a", NodeRole::Relay));
        reg.upsert_remote_node(Node::new("b", NodeRole::Relay));
        assert!(reg.link("a", "b").unwrap());
        assert!(!reg.link("b", "a").unwrap());
        assert!(reg.get("b").unwrap().connections.contains("a"));
        assert!(reg.unlink("b", "a"));
        assert!(reg.get("a").unwrap().connections.is_empty());
        assert!(reg.link("a", "a").is_err());
        assert!(reg.link("a", "zzz").is_err());
    }

    #[test]
    fn test_prune_removes_stale_and_their_links() {
        let reg = registry();
        reg.register_local_node("local", NodeRole::Coordinator, [], 0);
        reg.upsert_remote_node(Node::new("fresh", NodeRole::Relay).with_last_seen(900));
        reg.upsert_remote_node(Node::new("stale", NodeRole::Relay).with_last_seen(100));
        reg.link("local", "stale").unwrap();
        reg.link("fresh", "stale").unwrap();

        let removed = reg.prune(500, 1_000);
        assert_eq!(removed, vec!["stale".to_string()]);
        assert!(reg.contains("local"));
        assert!(reg.get("fresh").unwrap().connections.is_empty());
        assert!(reg.get("local").unwrap().connections.is_empty());
    }

    #[test]
    fn test_update_cannot_touch_links() {
        let reg = registry();
        reg.upsert_remote_node(Node::new("a", NodeRole::Relay));
        reg.upsert_remote_node(Node::new("b", NodeRole::Relay));
        reg.link("a", "b").unwrap();
        let version = reg.topology_version();
        reg.update("a", |n| {
            n.connections.clear();
            n.emergency_status = EmergencyStatus::Critical;
        })
        .unwrap();
        let a = reg.get("a").unwrap();
        assert!(a.connections.contains("b"));
        assert_eq!(a.emergency_status, EmergencyStatus::Critical);
        assert_eq!(reg.topology_version(), version);

        reg.update("a", |n| n.position = Some(Position::Planar { x: 1.0, y: 1.0 }))
            .unwrap();
        assert!(reg.topology_version() > version);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let reg = registry();
        reg.upsert_remote_node(Node::new("a", NodeRole::Relay));
        let before = reg.snapshot();
        reg.upsert_remote_node(Node::new("b", NodeRole::Relay));
        assert_eq!(before.len(), 1);
        assert_eq!(reg.snapshot().len(), 2);
    }
}
