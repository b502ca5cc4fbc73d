// Network simulator: discrete-tick driver for the routing stack.
//
// Every node gets its own route table; all of them share one discovery engine
// and one message router. A message moves at most one hop per tick. Every
// random draw comes from a single seeded generator and nodes are visited in id
// order, so a config always replays to the same metrics.

use super::metrics::{failure_rate, DeliveryTally, SimulationMetrics};
use super::scenario::SimulationConfig;
use crate::config::MeshConfig;
use crate::events::{EventBus, MeshEvent};
use crate::message::{
    MeshMessage, MessageKind, MessageRouter, Priority, RouteOutcome, RoutingContext,
};
use crate::node::{Capability, EmergencyStatus, Node, NodeId, NodeRole, OnlineState, Position};
use crate::routing::{
    Algorithm, GraphDiscovery, Route, RouteConstraints, RouteDiscoveryEngine, RouteTable,
};
use crate::topology::{compute_health, ConnectionGraph};
use crate::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info};

/// Simulated milliseconds per tick.
pub const TICK_MS: u64 = 1_000;

/// Plane the population lives on.
const AREA_WIDTH: f64 = 800.0;
const AREA_HEIGHT: f64 = 600.0;


// ============================================================================
// EVENT LOG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationEventKind {
    NodeFailure,
    BatteryDepleted,
    EmergencyActivated,
    NetworkPartition { components: usize },
}

/// One entry of the run's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationEvent {
    pub tick: u64,
    pub kind: SimulationEventKind,
    pub node_id: Option<NodeId>,
    pub resolved_at: Option<u64>,
}

impl SimulationEvent {
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Outcome of a complete run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub scenario: String,
    pub algorithm: Algorithm,
    pub seed: u64,
    pub ticks: u64,
    pub metrics: SimulationMetrics,
    pub events: Vec<SimulationEvent>,
    pub route_discoveries: u64,
    pub failed_discoveries: u64,
}

// ============================================================================
// INTERNAL STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Downtime {
    Up,
    Failed,
    Depleted,
}

/// Per-node simulation parameters that the mesh model does not carry.
#[derive(Debug, Clone)]
struct Agent {
    drain_per_tick: f64,
    speed: f64,
    move_chance: f64,
    downtime: Downtime,
}

#[derive(Debug, Clone)]
struct Packet {
    seq: u64,
    message: MeshMessage,
}

/// Bookkeeping for one generated message across all its copies.
#[derive(Debug, Clone)]
struct Tracked {
    created: u64,
    emergency: bool,
    copies: usize,
    delivered: bool,
    seen_by: BTreeSet<NodeId>,
}

/// Routing view handed to the router while one node processes its queue.
struct SimContext<'a> {
    graph: &'a ConnectionGraph,
    tables: &'a BTreeMap<NodeId, RouteTable>,
    discovery: &'a RouteDiscoveryEngine,
    algorithm: Algorithm,
    now: u64,
}

impl RoutingContext for SimContext<'_> {
    fn neighbors(&self, node: &NodeId) -> Vec<NodeId> {
        self.graph.neighbors(node).cloned().collect()
    }

    fn resolve(
        &mut self,
        node: &NodeId,
        destination: &NodeId,
        constraints: &RouteConstraints,
    ) -> Option<Route> {
        let table = self.tables.get(node)?;
        let mut discovery = GraphDiscovery {
            engine: self.discovery,
            graph: self.graph,
            source: node,
            algorithm: self.algorithm,
            default_max_hops: table.max_hops(),
            now: self.now,
        };
        match table.find_route(destination, constraints, &discovery) {
            Ok(route) => Some(route),
            Err(_) if self.algorithm != Algorithm::Reactive => {
                // last link of the fallback chain
                discovery.algorithm = Algorithm::Reactive;
                table.find_route(destination, constraints, &discovery).ok()
            }
            Err(_) => None,
        }
    }
}

// ============================================================================
// SIMULATOR
// ============================================================================

pub struct NetworkSimulator {
    config: SimulationConfig,
    mesh: MeshConfig,
    rng: StdRng,
    tick: u64,
    nodes: BTreeMap<NodeId, Node>,
    agents: BTreeMap<NodeId, Agent>,
    topology_version: u64,
    graph: ConnectionGraph,
    discovery: RouteDiscoveryEngine,
    router: MessageRouter,
    tables: BTreeMap<NodeId, RouteTable>,
    queues: BTreeMap<NodeId, VecDeque<Packet>>,
    tracked: BTreeMap<u64, Tracked>,
    next_seq: u64,
    tally: DeliveryTally,
    log: Vec<SimulationEvent>,
    emergency_nodes: BTreeSet<NodeId>,
    failures: u64,
    battery_consumed: f64,
    metrics: SimulationMetrics,
    events: EventBus,
}

impl NetworkSimulator {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        Self::with_mesh_config(config, MeshConfig::default())
    }

    pub fn with_mesh_config(config: SimulationConfig, mesh: MeshConfig) -> Result<Self> {
        config.validate()?;
        let seed = *blake3::hash(&config.seed.to_le_bytes()).as_bytes();
        let routing = mesh.routing.clone().with_algorithm(config.algorithm);
        // route chatter stays off the simulation bus
        let table_events = EventBus::with_capacity(1);

        let mut sim = Self {
            rng: StdRng::from_seed(seed),
            tick: 0,
            nodes: BTreeMap::new(),
            agents: BTreeMap::new(),
            topology_version: 0,
            graph: ConnectionGraph::default(),
            discovery: RouteDiscoveryEngine::new(mesh.costs.clone()),
            router: MessageRouter::new(mesh.router.clone()),
            tables: BTreeMap::new(),
            queues: BTreeMap::new(),
            tracked: BTreeMap::new(),
            next_seq: 0,
            tally: DeliveryTally::default(),
            log: Vec::new(),
            emergency_nodes: BTreeSet::new(),
            failures: 0,
            battery_consumed: 0.0,
            metrics: SimulationMetrics::default(),
            events: EventBus::new(),
            config,
            mesh,
        };
        sim.populate();
        for id in sim.nodes.keys() {
            sim.tables
                .insert(id.clone(), RouteTable::new(routing.clone(), table_events.clone()));
            sim.queues.insert(id.clone(), VecDeque::new());
        }
        sim.refresh_graph();
        sim.recompute_metrics();
        info!(
            "Simulation '{}' ready: {} nodes, {} links, {} routing",
            sim.config.id,
            sim.nodes.len(),
            sim.graph.edge_count(),
            sim.config.algorithm
        );
        Ok(sim)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    pub fn is_finished(&self) -> bool {
        self.tick >= self.config.duration_ticks
    }

    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Live graph as of the last tick.
    pub fn graph(&self) -> &ConnectionGraph {
        &self.graph
    }

    pub fn event_log(&self) -> &[SimulationEvent] {
        &self.log
    }

    pub fn route_table(&self, id: &str) -> Option<&RouteTable> {
        self.tables.get(id)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Whether every connection list is mirrored by its peer.
    pub fn links_are_symmetric(&self) -> bool {
        self.nodes.values().all(|node| {
            node.connections.iter().all(|peer| {
                self.nodes
                    .get(peer)
                    .is_some_and(|p| p.connections.contains(&node.id))
            })
        })
    }

    fn now(&self) -> u64 {
        self.tick * TICK_MS
    }

    // ------------------------------------------------------------------------
    // Driving
    // ------------------------------------------------------------------------

    /// Advance one tick and return the refreshed metrics.
    pub fn step(&mut self) -> &SimulationMetrics {
        self.tick += 1;
        self.drain_batteries();
        self.move_and_relink();
        self.inject_failures();
        self.update_emergencies();
        self.drop_offline_queues();
        self.refresh_graph();
        self.detect_partition();
        self.generate_messages();
        self.process_messages();
        if self.tick % self.config.tuning.table_maintenance_ticks == 0 {
            let now = self.now();
            for table in self.tables.values() {
                table.maintain(now);
            }
        }
        self.recompute_metrics();

        self.events.publish(MeshEvent::SimulationTick { tick: self.tick });
        let interval = self.config.metrics_interval.max(1);
        if self.tick % interval == 0 || self.is_finished() {
            self.events.publish(MeshEvent::MetricsUpdated {
                metrics: self.metrics.clone(),
            });
        }
        debug!(
            "Tick {}: {} online, {} in flight, delivery {:.1}%",
            self.tick,
            self.metrics.online_nodes,
            self.metrics.messages_in_flight,
            self.metrics.delivery_rate
        );
        &self.metrics
    }

    /// Advance up to `ticks` ticks, stopping at the configured duration.
    pub fn run_for(&mut self, ticks: u64) -> &SimulationMetrics {
        for _ in 0..ticks {
            if self.is_finished() {
                break;
            }
            self.step();
        }
        &self.metrics
    }

    /// Run to the configured duration.
    pub fn run(&mut self) -> SimulationReport {
        let remaining = self.config.duration_ticks.saturating_sub(self.tick);
        self.run_for(remaining);
        self.report()
    }

    pub fn report(&self) -> SimulationReport {
        let stats = self.discovery.stats();
        SimulationReport {
            scenario: self.config.id.clone(),
            algorithm: self.config.algorithm,
            seed: self.config.seed,
            ticks: self.tick,
            metrics: self.metrics.clone(),
            events: self.log.clone(),
            route_discoveries: stats.found + stats.not_found,
            failed_discoveries: stats.not_found,
        }
    }

    // ------------------------------------------------------------------------
    // Population
    // ------------------------------------------------------------------------

    fn populate(&mut self) {
        let n = self.config.node_count;
        let relays = n / 5;
        let bridges = n / 10;
        let endpoints = n.saturating_sub(1 + relays + bridges);
        let drain = self.config.battery_drain_factor;
        let mobility = self.config.mobility_factor;
        let tuning = self.config.tuning;

        let coordinator = Node::new("node_coordinator", NodeRole::Coordinator)
            .with_position(Position::Planar { x: 400.0, y: 300.0 })
            .with_signal(95.0)
            .with_battery(90.0)
            .with_capabilities([
                Capability::Messaging,
                Capability::Location,
                Capability::Relay,
                Capability::Emergency,
                Capability::Storage,
            ]);
        self.add_node(coordinator, tuning.coordinator_drain * drain, 0.0, 0.0);

        let mut relay_ids = Vec::with_capacity(relays);
        for i in 0..relays {
            let node = Node::new(format!("node_relay_{}", i), NodeRole::Relay)
                .with_position(self.random_position(200.0, 150.0, 400.0, 300.0))
                .with_signal(85.0 + self.rng.gen::<f64>() * 10.0)
                .with_battery(70.0 + self.rng.gen::<f64>() * 20.0)
                .with_capabilities([Capability::Messaging, Capability::Location, Capability::Relay]);
            let speed = 0.5 + self.rng.gen::<f64>() * 1.5;
            relay_ids.push(node.id.clone());
            self.add_node(node, tuning.relay_drain * drain, speed, mobility);
        }

        let mut bridge_ids = Vec::with_capacity(bridges);
        for i in 0..bridges {
            let node = Node::new(format!("node_bridge_{}", i), NodeRole::Bridge)
                .with_position(self.random_position(100.0, 100.0, 600.0, 400.0))
                .with_signal(80.0 + self.rng.gen::<f64>() * 15.0)
                .with_battery(60.0 + self.rng.gen::<f64>() * 30.0)
                .with_capabilities([Capability::Messaging, Capability::Relay, Capability::Storage]);
            let speed = 0.3 + self.rng.gen::<f64>();
            bridge_ids.push(node.id.clone());
            self.add_node(node, tuning.bridge_drain * drain, speed, mobility);
        }

        let mut endpoint_ids = Vec::with_capacity(endpoints);
        for i in 0..endpoints {
            let node = Node::new(format!("node_endpoint_{}", i), NodeRole::Endpoint)
                .with_position(self.random_position(50.0, 50.0, 700.0, 500.0))
                .with_signal(70.0 + self.rng.gen::<f64>() * 20.0)
                .with_battery(50.0 + self.rng.gen::<f64>() * 40.0)
                .with_capabilities([Capability::Messaging, Capability::Location]);
            let speed = 0.2 + self.rng.gen::<f64>();
            endpoint_ids.push(node.id.clone());
            self.add_node(node, tuning.endpoint_drain * drain, speed, (mobility * 1.5).min(1.0));
        }

        self.wire_initial_links(&relay_ids, &bridge_ids, &endpoint_ids);
    }

    fn random_position(&mut self, x0: f64, y0: f64, width: f64, height: f64) -> Position {
        Position::Planar {
            x: x0 + self.rng.gen::<f64>() * width,
            y: y0 + self.rng.gen::<f64>() * height,
        }
    }

    fn add_node(&mut self, node: Node, drain_per_tick: f64, speed: f64, move_chance: f64) {
        self.agents.insert(
            node.id.clone(),
            Agent {
                drain_per_tick,
                speed,
                move_chance,
                downtime: Downtime::Up,
            },
        );
        self.nodes.insert(node.id.clone(), node);
    }

    fn wire_initial_links(&mut self, relays: &[NodeId], bridges: &[NodeId], endpoints: &[NodeId]) {
        let coordinator: NodeId = "node_coordinator".to_string();
        for relay in relays {
            self.link(&coordinator, relay);
        }
        for (i, relay) in relays.iter().enumerate() {
            for k in 0..bridges.len().min(2) {
                let bridge = &bridges[(i + k) % bridges.len()];
                self.link(relay, bridge);
            }
        }
        let connectors: Vec<NodeId> = relays.iter().chain(bridges).cloned().collect();
        for endpoint in endpoints {
            if connectors.is_empty() {
                break;
            }
            let mut shuffled = connectors.clone();
            shuffled.shuffle(&mut self.rng);
            let count = self.rng.gen_range(1..=3).min(shuffled.len());
            for connector in shuffled.iter().take(count) {
                self.link(endpoint, connector);
            }
        }

        let ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                if self.rng.gen::<f64>() < self.config.tuning.extra_link_chance {
                    self.link(a, b);
                }
            }
        }
        for id in &ids {
            let isolated = self.nodes.get(id).is_some_and(|n| n.connections.is_empty());
            if isolated && *id != coordinator {
                self.link(id, &coordinator);
            }
        }
    }

    fn link(&mut self, a: &str, b: &str) -> bool {
        if a == b || !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            return false;
        }
        let mut added = false;
        if let Some(node) = self.nodes.get_mut(a) {
            added |= node.connections.insert(b.to_string());
        }
        if let Some(node) = self.nodes.get_mut(b) {
            added |= node.connections.insert(a.to_string());
        }
        if added {
            self.topology_version += 1;
        }
        added
    }

    fn unlink(&mut self, a: &str, b: &str) -> bool {
        let mut removed = false;
        if let Some(node) = self.nodes.get_mut(a) {
            removed |= node.connections.remove(b);
        }
        if let Some(node) = self.nodes.get_mut(b) {
            removed |= node.connections.remove(a);
        }
        if removed {
            self.topology_version += 1;
        }
        removed
    }

    // ------------------------------------------------------------------------
    // Environment
    // ------------------------------------------------------------------------

    fn drain_batteries(&mut self) {
        let ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        for id in ids {
            let Some(agent) = self.agents.get(&id).cloned() else {
                continue;
            };
            match agent.downtime {
                Downtime::Up => {
                    if agent.drain_per_tick > 0.0 {
                        self.consume_battery(&id, agent.drain_per_tick);
                    }
                }
                Downtime::Depleted => {
                    if self.rng.gen::<f64>() < self.config.tuning.recharge_chance {
                        let level = match self.nodes.get_mut(&id) {
                            Some(node) => {
                                node.battery_level =
                                    (node.battery_level + self.config.tuning.recharge_amount).min(100.0);
                                node.battery_level
                            }
                            None => continue,
                        };
                        if level > self.config.tuning.recharge_online_level {
                            self.bring_online(&id);
                            self.resolve_event(&SimulationEventKind::BatteryDepleted, Some(&id));
                        }
                    }
                }
                Downtime::Failed => {}
            }
        }
    }

    fn consume_battery(&mut self, id: &str, amount: f64) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if !node.is_online() {
            return;
        }
        let drained = amount.min(node.battery_level);
        node.battery_level -= drained;
        self.battery_consumed += drained;
        if node.battery_level <= 0.0 {
            debug!("{} ran out of battery at tick {}", id, self.tick);
            self.take_offline(id, Downtime::Depleted);
            self.record_event(SimulationEventKind::BatteryDepleted, Some(id));
        }
    }

    fn move_and_relink(&mut self) {
        let interference = self.config.signal_interference;
        let mobility = self.config.mobility_factor;
        let ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        let mut moved = Vec::new();

        for id in &ids {
            let Some(agent) = self.agents.get(id).cloned() else {
                continue;
            };
            if agent.downtime != Downtime::Up {
                continue;
            }
            let fluctuation = if interference > 0.0 {
                (self.rng.gen::<f64>() - 0.5) * 2.0 * interference
            } else {
                0.0
            };
            let step = if mobility > 0.0 && agent.speed > 0.0 && self.rng.gen::<f64>() < agent.move_chance {
                let angle = self.rng.gen::<f64>() * std::f64::consts::TAU;
                Some((angle, agent.speed * mobility))
            } else {
                None
            };
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            node.signal_strength = (node.signal_strength + fluctuation).clamp(0.0, 100.0);
            if let (Some((angle, distance)), Some(Position::Planar { x, y })) = (step, node.position) {
                node.position = Some(Position::Planar {
                    x: (x + angle.cos() * distance).clamp(0.0, AREA_WIDTH),
                    y: (y + angle.sin() * distance).clamp(0.0, AREA_HEIGHT),
                });
                moved.push(id.clone());
            }
        }

        for id in &moved {
            let peers: Vec<NodeId> = self
                .nodes
                .get(id)
                .map(|n| n.connections.iter().cloned().collect())
                .unwrap_or_default();
            for peer in peers {
                if let Some((distance, range)) = self.separation(id, &peer) {
                    if distance > range * 2.0 {
                        debug!("Link {} <-> {} lost to distance", id, peer);
                        self.unlink(id, &peer);
                    }
                }
            }
        }

        for (i, a) in ids.iter().enumerate() {
            if !self.is_up(a) {
                continue;
            }
            for b in &ids[i + 1..] {
                if !self.is_up(b) || self.nodes.get(a).is_some_and(|n| n.connections.contains(b)) {
                    continue;
                }
                let in_range = self
                    .separation(a, b)
                    .is_some_and(|(distance, range)| distance <= range);
                if in_range && self.rng.gen::<f64>() < self.config.tuning.link_discovery_chance {
                    self.link(a, b);
                }
            }
        }
    }

    /// Distance between two nodes and their shared radio range.
    fn separation(&self, a: &str, b: &str) -> Option<(f64, f64)> {
        let na = self.nodes.get(a)?;
        let nb = self.nodes.get(b)?;
        let distance = na.position?.distance_to(&nb.position?)?;
        Some((distance, (na.signal_strength + nb.signal_strength) / 2.0))
    }

    fn is_up(&self, id: &str) -> bool {
        self.nodes.get(id).is_some_and(|n| n.is_online())
    }

    fn inject_failures(&mut self) {
        let chance = self.config.failure_rate / 100.0;
        let ids: Vec<NodeId> = self.nodes.keys().cloned().collect();
        for id in ids {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if node.role == NodeRole::Coordinator {
                continue;
            }
            match self.agents.get(&id).map(|a| a.downtime) {
                Some(Downtime::Up) if chance > 0.0 => {
                    if self.rng.gen::<f64>() < chance {
                        debug!("{} failed at tick {}", id, self.tick);
                        self.failures += 1;
                        self.take_offline(&id, Downtime::Failed);
                        self.record_event(SimulationEventKind::NodeFailure, Some(&id));
                    }
                }
                Some(Downtime::Failed) => {
                    if self.rng.gen::<f64>() < self.config.tuning.recovery_chance {
                        debug!("{} recovered at tick {}", id, self.tick);
                        self.bring_online(&id);
                        self.resolve_event(&SimulationEventKind::NodeFailure, Some(&id));
                    }
                }
                _ => {}
            }
        }
    }

    fn take_offline(&mut self, id: &str, downtime: Downtime) {
        if let Some(agent) = self.agents.get_mut(id) {
            agent.downtime = downtime;
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.online = OnlineState::Offline;
        }
        self.topology_version += 1;
        self.events.publish(MeshEvent::NodeLeft {
            node_id: id.to_string(),
        });
    }

    fn bring_online(&mut self, id: &str) {
        if let Some(agent) = self.agents.get_mut(id) {
            agent.downtime = Downtime::Up;
        }
        let now = self.now();
        if let Some(node) = self.nodes.get_mut(id) {
            node.online = OnlineState::Online;
            node.last_seen = now;
        }
        self.topology_version += 1;
        self.events.publish(MeshEvent::NodeJoined {
            node_id: id.to_string(),
        });
    }

    fn update_emergencies(&mut self) {
        let before = self.emergency_nodes.clone();

        let chance = self.config.emergency_probability / 10.0;
        if chance > 0.0 && self.rng.gen::<f64>() < chance {
            let candidates: Vec<NodeId> = self
                .nodes
                .values()
                .filter(|n| n.is_online() && !n.emergency_status.is_elevated())
                .map(|n| n.id.clone())
                .collect();
            if let Some(id) = candidates.choose(&mut self.rng).cloned() {
                self.activate_emergency(&id);
            }
        }

        let active: Vec<NodeId> = self.emergency_nodes.iter().cloned().collect();
        for id in active {
            if self.rng.gen::<f64>() < self.config.tuning.emergency_resolution_chance {
                self.resolve_emergency(&id);
            }
        }

        if before != self.emergency_nodes {
            let active = !self.emergency_nodes.is_empty();
            for table in self.tables.values() {
                table.set_emergency_mode(active, &self.emergency_nodes);
            }
            if before.is_empty() != self.emergency_nodes.is_empty() {
                self.events
                    .publish(MeshEvent::EmergencyStatusChanged { active });
            }
        }
    }

    fn activate_emergency(&mut self, id: &str) {
        let peers: Vec<NodeId> = match self.nodes.get_mut(id) {
            Some(node) => {
                node.emergency_status = EmergencyStatus::Emergency;
                node.connections.iter().cloned().collect()
            }
            None => return,
        };
        for peer in peers {
            if let Some(node) = self.nodes.get_mut(&peer) {
                if node.is_online() && node.emergency_status == EmergencyStatus::Normal {
                    node.emergency_status = EmergencyStatus::Alert;
                }
            }
        }
        info!("Emergency activated at {} (tick {})", id, self.tick);
        self.emergency_nodes.insert(id.to_string());
        self.record_event(SimulationEventKind::EmergencyActivated, Some(id));
    }

    fn resolve_emergency(&mut self, id: &str) {
        let peers: Vec<NodeId> = match self.nodes.get_mut(id) {
            Some(node) => {
                node.emergency_status = EmergencyStatus::Normal;
                node.connections.iter().cloned().collect()
            }
            None => return,
        };
        self.emergency_nodes.remove(id);
        for peer in peers {
            let near_other = self
                .nodes
                .get(&peer)
                .is_some_and(|n| n.connections.iter().any(|c| self.emergency_nodes.contains(c)));
            if let Some(node) = self.nodes.get_mut(&peer) {
                if node.emergency_status == EmergencyStatus::Alert && !near_other {
                    node.emergency_status = EmergencyStatus::Normal;
                }
            }
        }
        debug!("Emergency at {} resolved (tick {})", id, self.tick);
        self.resolve_event(&SimulationEventKind::EmergencyActivated, Some(id));
    }

    fn detect_partition(&mut self) {
        let components = self.graph.components();
        let open = self
            .log
            .iter()
            .any(|e| matches!(e.kind, SimulationEventKind::NetworkPartition { .. }) && !e.is_resolved());
        if components.len() > 1 && !open {
            info!("Partition at tick {}: {} components", self.tick, components.len());
            self.record_event(
                SimulationEventKind::NetworkPartition {
                    components: components.len(),
                },
                None,
            );
            self.events.publish(MeshEvent::PartitionDetected { components });
        } else if components.len() <= 1 && open {
            let tick = self.tick;
            if let Some(event) = self.log.iter_mut().rev().find(|e| {
                matches!(e.kind, SimulationEventKind::NetworkPartition { .. }) && !e.is_resolved()
            }) {
                event.resolved_at = Some(tick);
            }
        }
    }

    fn record_event(&mut self, kind: SimulationEventKind, node_id: Option<&str>) {
        self.log.push(SimulationEvent {
            tick: self.tick,
            kind,
            node_id: node_id.map(str::to_string),
            resolved_at: None,
        });
    }

    fn resolve_event(&mut self, kind: &SimulationEventKind, node_id: Option<&str>) {
        let tick = self.tick;
        if let Some(event) = self.log.iter_mut().rev().find(|e| {
            e.kind == *kind && e.node_id.as_deref() == node_id && !e.is_resolved()
        }) {
            event.resolved_at = Some(tick);
        }
    }

    fn refresh_graph(&mut self) {
        self.graph = ConnectionGraph::from_nodes(self.nodes.values(), self.topology_version);
    }

    // ------------------------------------------------------------------------
    // Traffic
    // ------------------------------------------------------------------------

    fn generate_messages(&mut self) {
        let expected = self.config.message_rate / 60.0;
        let mut count = expected.floor() as usize;
        if self.rng.gen::<f64>() < expected.fract() {
            count += 1;
        }
        let now = self.now();
        for _ in 0..count {
            let online: Vec<NodeId> = self.graph.node_ids().cloned().collect();
            if online.len() < 2 {
                return;
            }
            let source = online[self.rng.gen_range(0..online.len())].clone();
            let mut pick = self.rng.gen_range(0..online.len() - 1);
            if online[pick] == source {
                pick = online.len() - 1;
            }
            let destination = online[pick].clone();
            let priority = self.pick_priority();
            let kind = if priority == Priority::Emergency {
                MessageKind::Emergency
            } else {
                MessageKind::Unicast
            };

            let seq = self.next_seq;
            self.next_seq += 1;
            let mut message = MeshMessage::new(
                kind,
                priority,
                source.clone(),
                vec![destination],
                format!("simulated message {}", seq).into_bytes(),
                self.config.message_ttl,
                now,
            );
            message.id = format!("sim-{:06}", seq);

            self.tracked.insert(
                seq,
                Tracked {
                    created: self.tick,
                    emergency: message.is_emergency(),
                    copies: 1,
                    delivered: false,
                    seen_by: BTreeSet::from([source.clone()]),
                },
            );
            self.tally.generated += 1;
            if let Some(queue) = self.queues.get_mut(&source) {
                queue.push_back(Packet { seq, message });
            }
        }
    }

    fn pick_priority(&mut self) -> Priority {
        let mix = self.config.priority_mix;
        let total = mix.emergency + mix.high + mix.normal + mix.low;
        if total <= 0.0 {
            return Priority::Normal;
        }
        let roll = self.rng.gen::<f64>() * total;
        if roll < mix.emergency {
            Priority::Emergency
        } else if roll < mix.emergency + mix.high {
            Priority::High
        } else if roll < mix.emergency + mix.high + mix.normal {
            Priority::Normal
        } else {
            Priority::Low
        }
    }

    fn drop_offline_queues(&mut self) {
        let down: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| !n.is_online())
            .map(|n| n.id.clone())
            .collect();
        for id in down {
            let dropped: Vec<Packet> = self
                .queues
                .get_mut(&id)
                .map(|q| q.drain(..).collect())
                .unwrap_or_default();
            for packet in dropped {
                self.release(packet.seq);
            }
        }
    }

    fn process_messages(&mut self) {
        let now = self.now();
        let limit = self.config.max_messages_per_node;
        let processing_drain = self.config.tuning.processing_drain * self.config.battery_drain_factor;
        let mut arrivals: Vec<(NodeId, Packet)> = Vec::new();
        let online: Vec<NodeId> = self.graph.node_ids().cloned().collect();

        for id in online {
            let batch: Vec<Packet> = match self.queues.get_mut(&id) {
                Some(queue) => {
                    let take = queue.len().min(limit);
                    queue.drain(..take).collect()
                }
                None => continue,
            };
            for packet in batch {
                if processing_drain > 0.0 {
                    let factor = if packet.message.is_emergency() { 2.0 } else { 1.0 };
                    self.consume_battery(&id, processing_drain * factor);
                }
                let outcome = {
                    let mut ctx = SimContext {
                        graph: &self.graph,
                        tables: &self.tables,
                        discovery: &self.discovery,
                        algorithm: self.config.algorithm,
                        now,
                    };
                    self.router.route(packet.message, &id, &mut ctx)
                };
                self.settle(packet.seq, outcome, &mut arrivals);
            }
        }

        for (target, packet) in arrivals {
            match self.queues.get_mut(&target) {
                Some(queue) => queue.push_back(packet),
                None => self.release(packet.seq),
            }
        }
    }

    fn settle(&mut self, seq: u64, outcome: RouteOutcome, arrivals: &mut Vec<(NodeId, Packet)>) {
        match outcome {
            RouteOutcome::Delivered(message) => {
                self.deliver(seq, &message);
            }
            RouteOutcome::Forward(plan) => {
                if plan.delivered_locally {
                    self.deliver(seq, &plan.message);
                }
                if let Some(tracked) = self.tracked.get_mut(&seq) {
                    for target in plan.targets {
                        if tracked.seen_by.insert(target.clone()) {
                            tracked.copies += 1;
                            arrivals.push((
                                target,
                                Packet {
                                    seq,
                                    message: plan.message.clone(),
                                },
                            ));
                        }
                    }
                }
            }
            RouteOutcome::Expired(message) => {
                debug!("{} expired after {} hops", message.id, message.hop_count());
            }
            RouteOutcome::Failed { message, reason } => {
                debug!("{} failed: {}", message.id, reason);
            }
        }
        self.release(seq);
    }

    fn deliver(&mut self, seq: u64, message: &MeshMessage) {
        let Some(tracked) = self.tracked.get_mut(&seq) else {
            return;
        };
        if tracked.delivered {
            return;
        }
        tracked.delivered = true;
        let latency = self.tick.saturating_sub(tracked.created);
        self.tally
            .record_delivery(latency, message.hop_count(), tracked.emergency);
    }

    /// One copy of `seq` is gone; the message is settled once none remain.
    fn release(&mut self, seq: u64) {
        let finished = match self.tracked.get_mut(&seq) {
            Some(tracked) => {
                tracked.copies = tracked.copies.saturating_sub(1);
                tracked.copies == 0
            }
            None => false,
        };
        if finished {
            if let Some(tracked) = self.tracked.remove(&seq) {
                if !tracked.delivered {
                    self.tally.record_failure();
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------------------

    fn recompute_metrics(&mut self) {
        let total = self.nodes.len();
        let online = self.nodes.values().filter(|n| n.is_online()).count();
        let nodes: Vec<Node> = self.nodes.values().cloned().collect();
        let in_flight = self.tracked.values().filter(|t| !t.delivered).count() as u64;
        let consumption = if self.tick == 0 || total == 0 {
            0.0
        } else {
            self.battery_consumed / total as f64 / self.tick as f64 * 60.0
        };

        self.metrics = SimulationMetrics {
            tick: self.tick,
            delivery_rate: self.tally.delivery_rate(),
            average_latency: self.tally.average_latency(),
            network_reliability: if total == 0 {
                0.0
            } else {
                online as f64 / total as f64 * 100.0
            },
            routing_efficiency: self.tally.routing_efficiency(),
            emergency_response_time: self.tally.emergency_response_time(),
            coverage: self.graph.edge_density(),
            node_failure_rate: failure_rate(self.failures, total, self.tick),
            battery_consumption: consumption,
            total_battery_consumed: self.battery_consumed,
            average_hops: self.tally.average_hops(),
            network_health: compute_health(&nodes, &self.mesh.topology),
            online_nodes: online,
            total_nodes: total,
            components: self.graph.components().len(),
            active_emergencies: self.emergency_nodes.len(),
            messages_generated: self.tally.generated,
            messages_delivered: self.tally.delivered,
            messages_failed: self.tally.failed,
            messages_in_flight: in_flight,
            node_failures: self.failures,
        };
    }
}
