// Mesh engine: one local node with every component wired together.
//
// The engine owns nothing the components do not already own; it threads the
// clock, transport and identity through them and turns wire frames into calls.

use crate::broadcast::{
    AckOutcome, BroadcastChannel, BroadcastOptions, BroadcastType, EmergencyBroadcast,
    EmergencyBroadcastDistributor, IngestOutcome, Severity,
};
use crate::clock::{Clock, SystemClock};
use crate::config::MeshConfig;
use crate::events::{EventBus, MeshEvent};
use crate::message::{
    decode_frame, encode_frame, DeliveryStatus, MeshMessage, MessageKind, MessageRouter, Priority,
    RouteOutcome, RoutingContext, WireFrame,
};
use crate::node::{Capability, EmergencyStatus, Node, NodeId, NodeRegistry, NodeRole, UpsertOutcome};
use crate::platform::{
    IdentityProvider, InMemoryTransport, LocationProvider, PeerDiscoverySource, StaticLocation,
    Transport,
};
use crate::routing::{
    Algorithm, DiscoveryRequest, GraphDiscovery, Route, RouteConstraints, RouteDiscoveryEngine,
    RouteMaintenance, RouteTable,
};
use crate::store::{Snapshot, SnapshotStore};
use crate::topology::{ConnectionGraph, HealthReport, TopologyManager, TopologyShape};
use crate::{MeshError, Result};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Host-supplied collaborators.
#[derive(Clone)]
pub struct Platform {
    pub clock: Arc<dyn Clock>,
    pub transport: Arc<dyn Transport>,
    pub location: Arc<dyn LocationProvider>,
    pub identity: Option<Arc<dyn IdentityProvider>>,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            transport: Arc::new(InMemoryTransport::new()),
            location: Arc::new(StaticLocation::new(None)),
            identity: None,
        }
    }
}

impl Platform {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_location(mut self, location: Arc<dyn LocationProvider>) -> Self {
        self.location = location;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundOutcome {
    /// Addressed to us.
    Delivered(MeshMessage),
    /// Passed on; `delivered` is set when we were also a recipient.
    Forwarded {
        message_id: String,
        targets: Vec<NodeId>,
        delivered: bool,
    },
    /// Stopped here as expired or failed.
    Dropped {
        message_id: String,
        status: DeliveryStatus,
    },
    Duplicate,
    Broadcast(IngestOutcome),
    /// Counted against a broadcast we raised.
    Acknowledged,
    /// Someone else's acknowledgement, passed on toward its sender.
    AckRelayed {
        broadcast_id: String,
        targets: Vec<NodeId>,
    },
    Cancelled,
    Heartbeat,
}

/// Result of one full maintenance pass.
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub routes: RouteMaintenance,
    pub expired_broadcasts: Vec<String>,
    pub retried_broadcasts: usize,
    pub pruned_nodes: Vec<NodeId>,
    pub health: Vec<HealthReport>,
    pub reshaped: Vec<(String, TopologyShape)>,
}

// ============================================================================
// BROADCAST PATHS
// ============================================================================

/// Sends broadcast frames over the local node's links and transport.
struct EngineChannel {
    local_id: NodeId,
    registry: Arc<NodeRegistry>,
    routes: Arc<RouteTable>,
    transport: Arc<dyn Transport>,
    ack_ttl: u32,
}

impl EngineChannel {
    fn mesh_neighbours(&self) -> Vec<NodeId> {
        let nodes = self.registry.snapshot();
        let Some(local) = nodes.get(&self.local_id) else {
            return Vec::new();
        };
        local
            .connections
            .iter()
            .filter(|id| nodes.get(*id).map_or(false, |n| n.is_online()))
            .cloned()
            .collect()
    }

    fn send_all(&self, targets: &[NodeId], frame: &WireFrame) -> usize {
        self.send_each(targets, frame).len()
    }

    /// Targets that accepted `frame`.
    fn send_each(&self, targets: &[NodeId], frame: &WireFrame) -> Vec<NodeId> {
        let bytes = match encode_frame(frame) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Cannot encode frame: {}", e);
                return Vec::new();
            }
        };
        targets
            .iter()
            .filter(|t| self.transport.send_direct(t, &bytes))
            .cloned()
            .collect()
    }

    /// Pass a broadcast on to our neighbours, never back where it came from.
    fn relay_broadcast(&self, broadcast: &EmergencyBroadcast, hops_left: u32, from: &str) -> usize {
        let targets: Vec<NodeId> = self
            .mesh_neighbours()
            .into_iter()
            .filter(|id| id != from && *id != broadcast.sender.id)
            .collect();
        let frame = WireFrame::Broadcast {
            broadcast: broadcast.clone(),
            hops_left,
        };
        self.send_each(&targets, &frame).len()
    }

    /// Move an ack one step toward `sender`: straight there when linked, else
    /// via the known next hop, else to every neighbour but `exclude`.
    fn route_ack(
        &self,
        frame: &WireFrame,
        sender: &NodeId,
        next_hop: Option<NodeId>,
        exclude: Option<&str>,
    ) -> Vec<NodeId> {
        if self.transport.connected_peers().contains(sender) {
            let sent = self.send_each(std::slice::from_ref(sender), frame);
            if !sent.is_empty() {
                return sent;
            }
        }
        if let Some(hop) = next_hop.filter(|h| Some(h.as_str()) != exclude && *h != self.local_id) {
            let sent = self.send_each(std::slice::from_ref(&hop), frame);
            if !sent.is_empty() {
                return sent;
            }
        }
        let targets: Vec<NodeId> = self
            .mesh_neighbours()
            .into_iter()
            .filter(|id| Some(id.as_str()) != exclude)
            .collect();
        self.send_each(&targets, frame)
    }
}

impl BroadcastChannel for EngineChannel {
    fn flood(&self, broadcast: &EmergencyBroadcast, hops_left: u32) -> bool {
        hops_left > 0 && self.relay_broadcast(broadcast, hops_left, &broadcast.sender.id) > 0
    }

    fn direct(&self, broadcast: &EmergencyBroadcast, hops_left: u32) -> bool {
        if hops_left == 0 {
            return false;
        }
        let linked: BTreeSet<NodeId> = self.mesh_neighbours().into_iter().collect();
        let targets: Vec<NodeId> = self
            .transport
            .connected_peers()
            .into_iter()
            .filter(|id| !linked.contains(id) && *id != broadcast.sender.id)
            .collect();
        let frame = WireFrame::Broadcast {
            broadcast: broadcast.clone(),
            hops_left,
        };
        self.send_all(&targets, &frame) > 0
    }

    fn acknowledge(&self, broadcast_id: &str, sender: &NodeId, from: &NodeId) {
        if self.ack_ttl == 0 {
            return;
        }
        let frame = WireFrame::BroadcastAck {
            broadcast_id: broadcast_id.to_string(),
            node_id: from.clone(),
            sender: sender.clone(),
            hops_left: self.ack_ttl,
        };
        let next_hop = self
            .routes
            .lookup(sender, &RouteConstraints::default())
            .map(|r| r.next_hop);
        let targets = self.route_ack(&frame, sender, next_hop, None);
        if targets.is_empty() {
            debug!("No path back to {} for ack of {}", sender, broadcast_id);
        }
    }

    fn cancel_notice(&self, broadcast_id: &str, requester: &NodeId) {
        let frame = WireFrame::BroadcastCancel {
            broadcast_id: broadcast_id.to_string(),
            requester: requester.clone(),
        };
        let mut targets: BTreeSet<NodeId> = self.mesh_neighbours().into_iter().collect();
        targets.extend(self.transport.connected_peers());
        let targets: Vec<NodeId> = targets.into_iter().collect();
        self.send_all(&targets, &frame);
    }
}

// ============================================================================
// ROUTING CONTEXT
// ============================================================================

/// Route lookups for the local node against one graph version.
struct EngineContext<'a> {
    engine: &'a MeshEngine,
    graph: &'a ConnectionGraph,
    now: u64,
}

impl RoutingContext for EngineContext<'_> {
    fn neighbors(&self, node: &NodeId) -> Vec<NodeId> {
        self.graph.neighbors(node).cloned().collect()
    }

    fn resolve(
        &mut self,
        node: &NodeId,
        destination: &NodeId,
        constraints: &RouteConstraints,
    ) -> Option<Route> {
        if *node != self.engine.local_id {
            return None;
        }
        let discovery = GraphDiscovery {
            engine: self.engine.discovery.as_ref(),
            graph: self.graph,
            source: node,
            algorithm: self.engine.config.routing.algorithm,
            default_max_hops: self.engine.routes.max_hops(),
            now: self.now,
        };
        match self.engine.routes.find_route(destination, constraints, &discovery) {
            Ok(route) => Some(route),
            Err(e) => {
                debug!("Route lookup {} -> {} failed: {}", node, destination, e);
                None
            }
        }
    }
}

// ============================================================================
// MESH ENGINE
// ============================================================================

#[derive(Clone)]
pub struct MeshEngine {
    config: Arc<MeshConfig>,
    local_id: NodeId,
    platform: Platform,
    events: EventBus,
    registry: Arc<NodeRegistry>,
    topology: Arc<TopologyManager>,
    routes: Arc<RouteTable>,
    discovery: Arc<RouteDiscoveryEngine>,
    router: Arc<MessageRouter>,
    broadcasts: Arc<EmergencyBroadcastDistributor>,
    channel: Arc<EngineChannel>,
    peer_sources: Arc<RwLock<Vec<Arc<dyn PeerDiscoverySource>>>>,
    snapshots: Option<Arc<SnapshotStore>>,
    inbox: Arc<Mutex<Vec<MeshMessage>>>,
    running: Arc<RwLock<bool>>,
}

impl MeshEngine {
    /// Engine for `local_id` with default collaborators.
    pub fn new(local_id: impl Into<NodeId>, role: NodeRole, config: MeshConfig) -> Self {
        Self::with_platform(local_id, role, config, Platform::default())
    }

    pub fn with_platform(
        local_id: impl Into<NodeId>,
        role: NodeRole,
        config: MeshConfig,
        platform: Platform,
    ) -> Self {
        let local_id = local_id.into();
        let events = EventBus::new();
        let now = platform.clock.now_ms();

        let registry = Arc::new(NodeRegistry::new(events.clone()));
        let capabilities = [
            Capability::Messaging,
            Capability::Relay,
            Capability::Emergency,
            Capability::Location,
        ];
        registry.register_local_node(local_id.clone(), role, capabilities, now);
        if let Some(location) = platform.location.current_location() {
            let _ = registry.update(&local_id, |n| {
                n.position = Some(crate::node::Position::Geo {
                    lat: location.lat,
                    lon: location.lon,
                })
            });
        }

        let topology = Arc::new(TopologyManager::new(
            registry.clone(),
            config.topology.clone(),
            events.clone(),
        ));
        let routes = Arc::new(RouteTable::new(config.routing.clone(), events.clone()));
        let discovery = Arc::new(RouteDiscoveryEngine::new(config.costs.clone()));
        let router = Arc::new(MessageRouter::new(config.router.clone()));
        let channel = Arc::new(EngineChannel {
            local_id: local_id.clone(),
            registry: registry.clone(),
            routes: routes.clone(),
            transport: platform.transport.clone(),
            ack_ttl: config.broadcast.ack_ttl,
        });
        let mut distributor = EmergencyBroadcastDistributor::new(
            config.broadcast.clone(),
            local_id.clone(),
            role,
            platform.location.clone(),
            channel.clone(),
            events.clone(),
        );
        if let Some(identity) = &platform.identity {
            distributor = distributor.with_identity(identity.clone());
        }

        Self {
            config: Arc::new(config),
            local_id,
            platform,
            events,
            registry,
            topology,
            routes,
            discovery,
            router,
            broadcasts: Arc::new(distributor),
            channel,
            peer_sources: Arc::new(RwLock::new(Vec::new())),
            snapshots: None,
            inbox: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Persist route and broadcast snapshots through `store`.
    pub fn with_snapshots(mut self, store: SnapshotStore) -> Self {
        self.snapshots = Some(Arc::new(store));
        self
    }

    // ------------------------------------------------------------------------
    // LIFECYCLE
    // ------------------------------------------------------------------------

    pub fn start(&self) -> Result<()> {
        let mut running = self.running.write();
        if *running {
            return Err(MeshError::Invalid("engine already running".into()));
        }
        if self.snapshots.is_some() {
            if let Err(e) = self.restore_snapshot() {
                warn!("Snapshot restore failed: {}", e);
            }
        }
        *running = true;
        info!("Mesh engine {} started", self.local_id);
        Ok(())
    }

    pub fn stop(&self) {
        let mut running = self.running.write();
        if !*running {
            return;
        }
        if self.snapshots.is_some() {
            if let Err(e) = self.save_snapshot() {
                warn!("Snapshot save failed: {}", e);
            }
        }
        *running = false;
        info!("Mesh engine {} stopped", self.local_id);
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    // ------------------------------------------------------------------------
    // ACCESSORS
    // ------------------------------------------------------------------------

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    pub fn config(&self) -> &MeshConfig {
        &self.config
    }

    pub fn now(&self) -> u64 {
        self.platform.clock.now_ms()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn topology(&self) -> &Arc<TopologyManager> {
        &self.topology
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn discovery(&self) -> &Arc<RouteDiscoveryEngine> {
        &self.discovery
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    pub fn broadcasts(&self) -> &Arc<EmergencyBroadcastDistributor> {
        &self.broadcasts
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.platform.transport
    }

    /// Messages delivered to this node, drained.
    pub fn take_delivered(&self) -> Vec<MeshMessage> {
        std::mem::take(&mut *self.inbox.lock())
    }

    // ------------------------------------------------------------------------
    // PEERS & LINKS
    // ------------------------------------------------------------------------

    pub fn add_peer_source(&self, source: Arc<dyn PeerDiscoverySource>) {
        self.peer_sources.write().push(source);
    }

    /// Poll every discovery source; newly seen peers are connected. Returns
    /// the number of peers that joined or rejoined.
    pub async fn discover_peers(&self) -> usize {
        let sources: Vec<Arc<dyn PeerDiscoverySource>> = self.peer_sources.read().clone();
        let now = self.now();
        let batches = join_all(sources.iter().map(|source| source.discover())).await;
        let mut joined = 0;
        for batch in batches {
            for mut node in batch {
                if node.id == self.local_id {
                    continue;
                }
                node.last_seen = now;
                let id = node.id.clone();
                let outcome = self.registry.upsert_remote_node(node);
                if matches!(outcome, UpsertOutcome::Joined | UpsertOutcome::Rejoined) {
                    joined += 1;
                    if let Err(e) = self.connect_peer(&id) {
                        debug!("Could not link discovered peer {}: {}", id, e);
                    }
                }
            }
        }
        joined
    }

    /// Learn about a peer without linking it.
    pub fn add_remote_node(&self, node: Node) -> UpsertOutcome {
        self.registry.upsert_remote_node(node)
    }

    /// Open a transport link and record it in the topology.
    pub fn connect_peer(&self, peer: &str) -> Result<bool> {
        self.registry.get(peer)?;
        if !self.platform.transport.connect(&peer.to_string()) {
            return Err(MeshError::Timeout(format!("transport could not reach {}", peer)));
        }
        self.topology.connect(&self.local_id, peer)
    }

    pub fn disconnect_peer(&self, peer: &str) -> bool {
        self.platform.transport.disconnect(&peer.to_string());
        let removed = self.topology.disconnect(&self.local_id, peer);
        if removed {
            self.routes.invalidate_next_hop(peer);
        }
        removed
    }

    // ------------------------------------------------------------------------
    // ROUTING
    // ------------------------------------------------------------------------

    fn discovery_for<'a>(&'a self, graph: &'a ConnectionGraph, now: u64) -> GraphDiscovery<'a> {
        GraphDiscovery {
            engine: self.discovery.as_ref(),
            graph,
            source: &self.local_id,
            algorithm: self.config.routing.algorithm,
            default_max_hops: self.routes.max_hops(),
            now,
        }
    }

    /// Best route from this node, discovering one if the table has none.
    pub fn find_route(&self, destination: &str, constraints: &RouteConstraints) -> Result<Route> {
        let graph = self.topology.graph();
        let discovery = self.discovery_for(&graph, self.now());
        self.routes
            .find_route(&destination.to_string(), constraints, &discovery)
    }

    /// Timed discovery on the blocking pool; a timeout leaves the table untouched.
    pub async fn discover_route(&self, destination: &str, algorithm: Algorithm) -> Result<Route> {
        let graph = Arc::new(self.topology.graph());
        let request = DiscoveryRequest::new(self.local_id.clone(), destination, self.routes.max_hops())
            .with_emergency(self.routes.is_emergency_mode());
        let timeout = Duration::from_millis(self.config.routing.discovery_timeout_ms);
        let session = self
            .discovery
            .discover_with_timeout(graph, request, algorithm, self.now(), timeout)
            .await;
        let route = session.into_result()?;
        self.routes.upsert(route.clone());
        Ok(route)
    }

    // ------------------------------------------------------------------------
    // MESSAGING
    // ------------------------------------------------------------------------

    pub fn send_unicast(&self, destination: &str, payload: Vec<u8>) -> RouteOutcome {
        let message = MeshMessage::unicast(
            &self.local_id,
            destination,
            payload,
            self.config.router.default_ttl,
            self.now(),
        );
        self.send(message)
    }

    /// Flooded to every reachable node.
    pub fn send_emergency(&self, payload: Vec<u8>) -> RouteOutcome {
        let message = MeshMessage::new(
            MessageKind::Emergency,
            Priority::Emergency,
            self.local_id.clone(),
            Vec::new(),
            payload,
            self.config.router.default_ttl,
            self.now(),
        );
        self.send(message)
    }

    /// Route and transmit a message originating here.
    pub fn send(&self, message: MeshMessage) -> RouteOutcome {
        self.router.accept_inbound(&message.id);
        self.dispatch(message)
    }

    /// Resend a failed or expired message as a new one.
    pub fn retry(&self, failed: &MeshMessage) -> Result<RouteOutcome> {
        let message = self.router.retry(failed, self.now())?;
        Ok(self.send(message))
    }

    fn dispatch(&self, message: MeshMessage) -> RouteOutcome {
        let now = self.now();
        let graph = self.topology.graph();
        let mut ctx = EngineContext {
            engine: self,
            graph: &graph,
            now,
        };
        let outcome = self.router.route(message, &self.local_id, &mut ctx);

        let outcome = match outcome {
            RouteOutcome::Forward(plan) => {
                let frame = WireFrame::Message(plan.message.clone());
                let sent = self.channel.send_all(&plan.targets, &frame);
                if sent == 0 {
                    for target in &plan.targets {
                        for destination in &plan.message.destinations {
                            self.routes.invalidate(destination, target);
                        }
                    }
                    let mut message = plan.message;
                    let _ = message.set_status(DeliveryStatus::Failed);
                    RouteOutcome::Failed {
                        message,
                        reason: MeshError::Exhausted("no target accepted the message".into()),
                    }
                } else {
                    RouteOutcome::Forward(plan)
                }
            }
            other => other,
        };

        let targets = match &outcome {
            RouteOutcome::Forward(plan) => plan.targets.clone(),
            _ => Vec::new(),
        };
        if let RouteOutcome::Failed { message, reason } = &outcome {
            debug!("Message {} failed: {}", message.id, reason);
        }
        self.events.publish(MeshEvent::MessageRouted {
            message_id: outcome.message().id.clone(),
            status: outcome.status(),
            targets,
        });
        outcome
    }

    // ------------------------------------------------------------------------
    // INBOUND
    // ------------------------------------------------------------------------

    /// Handle one frame received from `from`.
    pub fn handle_inbound(&self, from: &str, bytes: &[u8]) -> Result<InboundOutcome> {
        let frame = decode_frame(bytes)?;
        let now = self.now();
        if self.registry.contains(from) {
            let _ = self.registry.update(from, |n| n.last_seen = now);
        }

        match frame {
            WireFrame::Message(message) => {
                if !self.router.accept_inbound(&message.id) {
                    return Ok(InboundOutcome::Duplicate);
                }
                let id = message.id.clone();
                Ok(match self.dispatch(message) {
                    RouteOutcome::Delivered(message) => {
                        self.inbox.lock().push(message.clone());
                        InboundOutcome::Delivered(message)
                    }
                    RouteOutcome::Forward(plan) => {
                        if plan.delivered_locally {
                            self.inbox.lock().push(plan.message.clone());
                        }
                        InboundOutcome::Forwarded {
                            message_id: id,
                            targets: plan.targets,
                            delivered: plan.delivered_locally,
                        }
                    }
                    other => InboundOutcome::Dropped {
                        message_id: id,
                        status: other.status(),
                    },
                })
            }
            WireFrame::Broadcast {
                broadcast,
                hops_left,
            } => {
                let outcome = self.broadcasts.ingest(broadcast.clone(), now)?;
                // out-of-area nodes still carry it for the ones inside
                if matches!(outcome, IngestOutcome::Accepted | IngestOutcome::OutsideArea) {
                    let remaining = hops_left.saturating_sub(1);
                    if remaining > 0 {
                        self.channel.relay_broadcast(&broadcast, remaining, from);
                    } else {
                        debug!("Broadcast {} hop budget spent at {}", broadcast.id, self.local_id);
                    }
                }
                if outcome == IngestOutcome::Accepted && broadcast.is_critical() {
                    self.enter_emergency(now)?;
                }
                Ok(InboundOutcome::Broadcast(outcome))
            }
            WireFrame::BroadcastAck {
                broadcast_id,
                node_id,
                sender,
                hops_left,
            } => {
                if sender == self.local_id {
                    return Ok(
                        match self.broadcasts.record_acknowledgement(&broadcast_id, &node_id)? {
                            AckOutcome::Counted(_) => InboundOutcome::Acknowledged,
                            AckOutcome::Repeated => InboundOutcome::Duplicate,
                        },
                    );
                }
                if !self
                    .router
                    .accept_inbound(&format!("ack:{}:{}", broadcast_id, node_id))
                {
                    return Ok(InboundOutcome::Duplicate);
                }
                let remaining = hops_left.saturating_sub(1);
                if remaining == 0 {
                    debug!("Ack of {} from {} ran out of hops", broadcast_id, node_id);
                    return Ok(InboundOutcome::AckRelayed {
                        broadcast_id,
                        targets: Vec::new(),
                    });
                }
                let next_hop = self
                    .find_route(&sender, &RouteConstraints::default())
                    .ok()
                    .map(|r| r.next_hop);
                let frame = WireFrame::BroadcastAck {
                    broadcast_id: broadcast_id.clone(),
                    node_id,
                    sender: sender.clone(),
                    hops_left: remaining,
                };
                let targets = self.channel.route_ack(&frame, &sender, next_hop, Some(from));
                Ok(InboundOutcome::AckRelayed {
                    broadcast_id,
                    targets,
                })
            }
            WireFrame::BroadcastCancel {
                broadcast_id,
                requester,
            } => {
                self.broadcasts
                    .apply_remote_cancel(&broadcast_id, &requester)?;
                self.channel.cancel_notice(&broadcast_id, &requester);
                Ok(InboundOutcome::Cancelled)
            }
            WireFrame::Heartbeat { node_id, .. } => {
                if self.registry.contains(&node_id) {
                    self.registry.mark_online(&node_id, now)?;
                }
                Ok(InboundOutcome::Heartbeat)
            }
        }
    }

    // ------------------------------------------------------------------------
    // EMERGENCY
    // ------------------------------------------------------------------------

    pub fn is_emergency_mode(&self) -> bool {
        self.routes.is_emergency_mode()
    }

    /// Switch this node into emergency mode; returns the emergency network id.
    pub fn activate_emergency(&self) -> Result<String> {
        self.enter_emergency(self.now())
    }

    fn enter_emergency(&self, now: u64) -> Result<String> {
        self.registry.update(&self.local_id, |n| {
            if !n.emergency_status.is_elevated() {
                n.emergency_status = EmergencyStatus::Emergency;
            }
        })?;
        let network_id = self.topology.activate_emergency(&self.local_id, now)?;
        let elevated: BTreeSet<NodeId> = self
            .registry
            .snapshot()
            .values()
            .filter(|n| n.emergency_status.is_elevated())
            .map(|n| n.id.clone())
            .collect();
        self.routes.set_emergency_mode(true, &elevated);
        self.broadcasts.set_emergency_active(true);
        Ok(network_id)
    }

    pub fn deactivate_emergency(&self) -> Result<()> {
        self.registry
            .update(&self.local_id, |n| n.emergency_status = EmergencyStatus::Normal)?;
        self.routes.set_emergency_mode(false, &BTreeSet::new());
        self.broadcasts.set_emergency_active(false);
        Ok(())
    }

    pub fn create_broadcast(
        &self,
        kind: BroadcastType,
        severity: Severity,
        message: &str,
        options: BroadcastOptions,
    ) -> Result<EmergencyBroadcast> {
        let now = self.now();
        if severity == Severity::Critical {
            self.enter_emergency(now)?;
        }
        self.broadcasts.create(kind, severity, message, options, now)
    }

    pub fn cancel_broadcast(&self, broadcast_id: &str) -> Result<()> {
        self.broadcasts.cancel(broadcast_id)
    }

    // ------------------------------------------------------------------------
    // MAINTENANCE
    // ------------------------------------------------------------------------

    pub fn age_routes(&self) -> RouteMaintenance {
        self.routes.maintain(self.now())
    }

    pub fn sweep_broadcasts(&self) -> (Vec<String>, usize) {
        let report = self.broadcasts.maintain(self.now());
        (report.expired, report.retried)
    }

    /// Remove silent peers along with every route to or through them.
    pub fn prune_nodes(&self) -> Vec<NodeId> {
        let now = self.now();
        let pruned = self
            .registry
            .prune(self.config.topology.node_stale_after_ms, now);
        for id in &pruned {
            self.topology.handle_node_left(id, now);
            self.routes.remove_routes_via(id);
        }
        pruned
    }

    pub fn check_health(&self) -> Vec<HealthReport> {
        let reports = self.topology.check_health(self.now());
        self.topology.detect_partitions();
        reports
    }

    pub fn optimize_topology(&self) -> Vec<(String, TopologyShape)> {
        self.topology.optimize_all(self.now())
    }

    /// Heartbeat to every connected peer while in emergency mode.
    pub fn send_heartbeat(&self) -> usize {
        if !self.is_emergency_mode() {
            return 0;
        }
        let frame = WireFrame::Heartbeat {
            node_id: self.local_id.clone(),
            timestamp: self.now(),
        };
        let peers = self.platform.transport.connected_peers();
        self.channel.send_all(&peers, &frame)
    }

    /// Every periodic task once, in dependency order.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let pruned_nodes = self.prune_nodes();
        let routes = self.age_routes();
        let (expired_broadcasts, retried_broadcasts) = self.sweep_broadcasts();
        let health = self.check_health();
        let reshaped = self.optimize_topology();
        MaintenanceReport {
            routes,
            expired_broadcasts,
            retried_broadcasts,
            pruned_nodes,
            health,
            reshaped,
        }
    }

    // ------------------------------------------------------------------------
    // SNAPSHOTS
    // ------------------------------------------------------------------------

    fn snapshot_store(&self) -> Result<&SnapshotStore> {
        self.snapshots
            .as_deref()
            .ok_or_else(|| MeshError::Storage("no snapshot store configured".into()))
    }

    pub fn save_snapshot(&self) -> Result<()> {
        let snapshot = Snapshot {
            routes: self.routes.entries(),
            broadcasts: self.broadcasts.active(),
        };
        self.snapshot_store()?.save(&snapshot)
    }

    /// Reload routes and live broadcasts; returns (destinations, broadcasts).
    pub fn restore_snapshot(&self) -> Result<(usize, usize)> {
        let snapshot = self.snapshot_store()?.load()?;
        let destinations = snapshot.routes.len();
        self.routes.restore(snapshot.routes);
        let broadcasts = self.broadcasts.restore(snapshot.broadcasts, self.now());
        info!(
            "Restored snapshot: {} destinations, {} broadcasts",
            destinations, broadcasts
        );
        Ok((destinations, broadcasts))
    }
}
