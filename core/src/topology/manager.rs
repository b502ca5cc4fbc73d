// Topology manager: sole owner of link mutation and network lifecycle.

use super::graph::ConnectionGraph;
use super::health::{compute_health, Coverage, TopologySummary};
use super::network::{Network, NetworkKind};
use super::shape::{expected_efficiency, select_shape, ShapeInputs, TopologyShape};
use crate::config::TopologyConfig;
use crate::events::{EventBus, MeshEvent};
use crate::node::{Node, NodeId, NodeRegistry};
use crate::{MeshError, Result};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Outcome of a periodic health check for one network.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub network_id: String,
    pub health: f64,
    pub healed_links: Vec<(NodeId, NodeId)>,
}

pub struct TopologyManager {
    registry: Arc<NodeRegistry>,
    networks: RwLock<Arc<HashMap<String, Network>>>,
    config: TopologyConfig,
    events: EventBus,
    last_component_count: AtomicUsize,
}

impl TopologyManager {
    pub fn new(registry: Arc<NodeRegistry>, config: TopologyConfig, events: EventBus) -> Self {
        Self {
            registry,
            networks: RwLock::new(Arc::new(HashMap::new())),
            config,
            events,
            last_component_count: AtomicUsize::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    // ========================================================================
    // LINKS
    // ========================================================================

    /// Link two known nodes on both sides in one update.
    pub fn connect(&self, a: &str, b: &str) -> Result<bool> {
        let added = self.registry.link(a, b)?;
        if added {
            tracing::debug!("Linked {} <-> {}", a, b);
        }
        debug_assert!(self.check_symmetry().is_ok());
        Ok(added)
    }

    pub fn disconnect(&self, a: &str, b: &str) -> bool {
        let removed = self.registry.unlink(a, b);
        if removed {
            tracing::debug!("Unlinked {} <-> {}", a, b);
        }
        debug_assert!(self.check_symmetry().is_ok());
        removed
    }

    /// Tear down every link of `id`.
    pub fn detach(&self, id: &str) -> Vec<NodeId> {
        let peers = self.registry.detach(id);
        debug_assert!(self.check_symmetry().is_ok());
        peers
    }

    /// Verify every connection list is mirrored by its peer.
    pub fn check_symmetry(&self) -> Result<()> {
        let nodes = self.registry.snapshot();
        for node in nodes.values() {
            for peer in &node.connections {
                let mirrored = nodes
                    .get(peer)
                    .is_some_and(|p| p.connections.contains(&node.id));
                if !mirrored {
                    return Err(MeshError::Invariant(format!(
                        "{} lists {} but not vice versa",
                        node.id, peer
                    )));
                }
            }
        }
        Ok(())
    }

    /// Live graph over online nodes at the current topology version.
    pub fn graph(&self) -> ConnectionGraph {
        let nodes = self.registry.snapshot();
        ConnectionGraph::from_nodes(nodes.values(), self.registry.topology_version())
    }

    // ========================================================================
    // HEALTH & PARTITIONS
    // ========================================================================

    pub fn compute_health(&self, nodes: &[Node]) -> f64 {
        compute_health(nodes, &self.config)
    }

    pub fn summary(&self) -> TopologySummary {
        let nodes: Vec<Node> = self.registry.snapshot().values().cloned().collect();
        TopologySummary::compute(&nodes, &self.graph(), &self.config)
    }

    /// Components of the online subgraph. Publishes a partition event when
    /// there is more than one and the count changed since the last check.
    pub fn detect_partitions(&self) -> Vec<Vec<NodeId>> {
        let components = self.graph().components();
        let count = components.len();
        let previous = self.last_component_count.swap(count, Ordering::SeqCst);
        if count > 1 && count != previous {
            tracing::warn!("Network partitioned into {} components", count);
            self.events.publish(MeshEvent::PartitionDetected {
                components: components.clone(),
            });
        }
        components
    }

    fn members_of(&self, network: &Network) -> Vec<Node> {
        let nodes = self.registry.snapshot();
        network
            .members
            .iter()
            .filter_map(|id| nodes.get(id).cloned())
            .collect()
    }

    pub fn network_health(&self, network_id: &str) -> Result<f64> {
        let network = self.network(network_id)?;
        Ok(self.compute_health(&self.members_of(&network)))
    }

    /// Health of every network; unhealthy ones are healed.
    pub fn check_health(&self, now: u64) -> Vec<HealthReport> {
        let mut ids: Vec<String> = self.networks.read().keys().cloned().collect();
        ids.sort();
        let mut reports = Vec::new();
        for id in ids {
            let Ok(health) = self.network_health(&id) else {
                continue;
            };
            let healed_links = if health < self.config.low_health_threshold {
                tracing::warn!("Network {} health {:.1} below threshold", id, health);
                self.heal_network(&id).unwrap_or_default()
            } else {
                Vec::new()
            };
            let _ = self.refresh_network(&id, now);
            reports.push(HealthReport {
                network_id: id,
                health,
                healed_links,
            });
        }
        reports
    }

    /// Bridge disconnected member groups with the closest in-range pair.
    pub fn heal_network(&self, network_id: &str) -> Result<Vec<(NodeId, NodeId)>> {
        let network = self.network(network_id)?;
        let members: Vec<Node> = self
            .members_of(&network)
            .into_iter()
            .filter(|n| n.is_online())
            .collect();
        let graph = ConnectionGraph::from_nodes(members.iter(), 0);
        let components = graph.components();
        if components.len() < 2 {
            return Ok(Vec::new());
        }

        let by_id: HashMap<&str, &Node> = members.iter().map(|n| (n.id.as_str(), n)).collect();
        let mut healed = Vec::new();
        for pair in components.windows(2) {
            let mut best: Option<(f64, &str, &str)> = None;
            for a in &pair[0] {
                for b in &pair[1] {
                    let (Some(pa), Some(pb)) = (
                        by_id.get(a.as_str()).and_then(|n| n.position),
                        by_id.get(b.as_str()).and_then(|n| n.position),
                    ) else {
                        continue;
                    };
                    let Some(d) = pa.distance_to(&pb) else {
                        continue;
                    };
                    if d <= self.config.link_range_m && best.map_or(true, |(bd, _, _)| d < bd) {
                        best = Some((d, a.as_str(), b.as_str()));
                    }
                }
            }
            if let Some((_, a, b)) = best {
                if self.connect(a, b)? {
                    healed.push((a.to_string(), b.to_string()));
                }
            }
        }
        if !healed.is_empty() {
            tracing::info!("Healed network {} with {} links", network_id, healed.len());
        }
        Ok(healed)
    }

    // ========================================================================
    // NETWORK LIFECYCLE
    // ========================================================================

    pub fn networks(&self) -> Arc<HashMap<String, Network>> {
        self.networks.read().clone()
    }

    pub fn network(&self, id: &str) -> Result<Network> {
        self.networks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| MeshError::NotFound(format!("network {}", id)))
    }

    pub fn network_of(&self, node_id: &str) -> Option<String> {
        let networks = self.networks.read();
        let mut ids: Vec<&String> = networks
            .iter()
            .filter(|(_, n)| n.members.contains(node_id))
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids.first().map(|id| id.to_string())
    }

    pub fn create_network(
        &self,
        name: &str,
        kind: NetworkKind,
        founder: &str,
        now: u64,
    ) -> Result<Network> {
        let node = self.registry.get(founder)?;
        let mut network = Network::new(name, kind, founder.to_string(), now);
        if let Some(position) = node.position {
            network.coverage = Some(Coverage::circle(position, self.config.initial_radius_m));
        }
        let id = network.id.clone();
        self.mutate(|networks| {
            networks.insert(id.clone(), network.clone());
        });
        tracing::info!("Network {} formed by {}", id, founder);
        self.events.publish(MeshEvent::NetworkFormed { network_id: id });
        Ok(network)
    }

    /// Network the node belongs to, forming an emergency network if none.
    pub fn activate_emergency(&self, node_id: &str, now: u64) -> Result<String> {
        if let Some(existing) = self.network_of(node_id) {
            return Ok(existing);
        }
        let network = self.create_network("Emergency Network", NetworkKind::Emergency, node_id, now)?;
        Ok(network.id)
    }

    pub fn join_network(&self, network_id: &str, node_id: &str, now: u64) -> Result<()> {
        self.registry.get(node_id)?;
        let joined = self.mutate(|networks| {
            let network = networks
                .get_mut(network_id)
                .ok_or_else(|| MeshError::NotFound(format!("network {}", network_id)))?;
            Ok::<bool, MeshError>(network.members.insert(node_id.to_string()))
        })?;
        if joined {
            tracing::debug!("{} joined network {}", node_id, network_id);
            self.refresh_network(network_id, now)?;
        }
        Ok(())
    }

    /// Remove a member; returns true if that dissolved the network.
    pub fn leave_network(&self, network_id: &str, node_id: &str, now: u64) -> Result<bool> {
        let dissolved = self.mutate(|networks| {
            let network = networks
                .get_mut(network_id)
                .ok_or_else(|| MeshError::NotFound(format!("network {}", network_id)))?;
            if !network.members.remove(node_id) {
                return Err(MeshError::NotFound(format!(
                    "{} in network {}",
                    node_id, network_id
                )));
            }
            if network.members.is_empty() {
                networks.remove(network_id);
                return Ok(true);
            }
            Ok(false)
        })?;
        if dissolved {
            tracing::info!("Network {} dissolved", network_id);
            self.events.publish(MeshEvent::NetworkDissolved {
                network_id: network_id.to_string(),
            });
        } else {
            self.refresh_network(network_id, now)?;
        }
        Ok(dissolved)
    }

    /// Drop a departed node from every network it belonged to.
    pub fn handle_node_left(&self, node_id: &str, now: u64) -> Vec<String> {
        let mut ids: Vec<String> = self
            .networks
            .read()
            .iter()
            .filter(|(_, n)| n.members.contains(node_id))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids.into_iter()
            .filter(|id| matches!(self.leave_network(id, node_id, now), Ok(true)))
            .collect()
    }

    // ========================================================================
    // SHAPE OPTIMIZATION
    // ========================================================================

    fn shape_inputs(&self, network: &Network) -> ShapeInputs {
        let members: Vec<Node> = self
            .members_of(network)
            .into_iter()
            .filter(|n| n.is_online())
            .collect();
        let count = members.len().max(1) as f64;
        ShapeInputs {
            nodes: members.len(),
            mean_battery: members.iter().map(|n| n.battery_level).sum::<f64>() / count,
            mean_signal: members.iter().map(|n| n.signal_strength).sum::<f64>() / count,
            emergency: network.is_emergency(),
            max_degree: self.config.max_degree,
            model: self.config.shape_model,
        }
    }

    /// Re-evaluate one network's shape; returns the new shape if it switched.
    pub fn optimize(&self, network_id: &str, now: u64) -> Result<Option<TopologyShape>> {
        let network = self.network(network_id)?;
        let inputs = self.shape_inputs(&network);
        let switched = select_shape(network.shape, &inputs, self.config.shape_switch_margin);
        if let Some(shape) = switched {
            self.mutate(|networks| {
                if let Some(n) = networks.get_mut(network_id) {
                    n.shape = shape;
                }
            });
            tracing::info!("Network {} reshaped {} -> {}", network_id, network.shape, shape);
            self.events.publish(MeshEvent::TopologyChanged {
                network_id: network_id.to_string(),
                shape,
            });
        }
        self.refresh_network(network_id, now)?;
        Ok(switched)
    }

    pub fn optimize_all(&self, now: u64) -> Vec<(String, TopologyShape)> {
        let mut ids: Vec<String> = self.networks.read().keys().cloned().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| match self.optimize(&id, now) {
                Ok(Some(shape)) => Some((id, shape)),
                _ => None,
            })
            .collect()
    }

    /// Recompute coverage and the performance snapshot of one network.
    fn refresh_network(&self, network_id: &str, now: u64) -> Result<()> {
        let network = self.network(network_id)?;
        let members = self.members_of(&network);
        let online: Vec<&Node> = members.iter().filter(|n| n.is_online()).collect();
        let positions: Vec<_> = members.iter().filter_map(|n| n.position).collect();
        let coverage = Coverage::from_positions(&positions, self.config.coverage_buffer_m)
            .or(network.coverage);
        let graph = ConnectionGraph::from_nodes(members.iter(), 0);
        let inputs = self.shape_inputs(&network);
        let health = self.compute_health(&members);
        let throughput: f64 = online.iter().map(|n| n.signal_strength * 10.0).sum();
        let latency = graph.average_path_length().max(1.0) * self.config.hop_latency_ms;
        let efficiency = expected_efficiency(network.shape, &inputs);

        self.mutate(|networks| {
            if let Some(n) = networks.get_mut(network_id) {
                n.coverage = coverage;
                n.performance.throughput = throughput;
                n.performance.latency = latency;
                n.performance.reliability = health;
                n.performance.efficiency = efficiency;
                n.last_optimized = now;
            }
        });
        Ok(())
    }

    /// Online members not linked to any other member.
    pub fn isolated_members(&self, network_id: &str) -> Result<BTreeSet<NodeId>> {
        let network = self.network(network_id)?;
        let members = self.members_of(&network);
        let graph = ConnectionGraph::from_nodes(members.iter(), 0);
        Ok(graph
            .node_ids()
            .filter(|id| graph.degree(id) == 0)
            .cloned()
            .collect())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut HashMap<String, Network>) -> R) -> R {
        let mut guard = self.networks.write();
        let mut next = HashMap::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }
}
