// Message router: strategy selection, TTL accounting and loop prevention.
//
// The router decides; it never sends. Callers hand it a message and the node
// currently holding it, and get back what to do: deliver, forward a copy to a
// set of neighbours, or drop it as expired/failed.

use super::types::{DeliveryStatus, MeshMessage, MessageKind};
use crate::config::RouterConfig;
use crate::node::NodeId;
use crate::routing::{Route, RouteConstraints};
use crate::{MeshError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingStrategy {
    /// Every live neighbour not already on the route.
    Flooding,
    /// One unicast lookup per destination.
    Multicast,
    /// Route table lookup.
    Unicast,
    /// Every direct connection.
    Broadcast,
}

/// What the router needs to know about the network around a node.
pub trait RoutingContext {
    /// Live neighbours of `node`.
    fn neighbors(&self, node: &NodeId) -> Vec<NodeId>;

    /// Best route from `node` towards `destination`, discovering if needed.
    fn resolve(
        &mut self,
        node: &NodeId,
        destination: &NodeId,
        constraints: &RouteConstraints,
    ) -> Option<Route>;
}

/// Outgoing copy plus where to send it.
#[derive(Debug, Clone, PartialEq)]
pub struct ForwardPlan {
    pub strategy: RoutingStrategy,
    /// The copy to send: route already includes this node, ttl already decremented.
    pub message: MeshMessage,
    pub targets: Vec<NodeId>,
    /// This node is also a recipient.
    pub delivered_locally: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Delivered(MeshMessage),
    Forward(ForwardPlan),
    Expired(MeshMessage),
    Failed {
        message: MeshMessage,
        reason: MeshError,
    },
}

impl RouteOutcome {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            RouteOutcome::Delivered(_) => DeliveryStatus::Delivered,
            RouteOutcome::Forward(plan) => plan.message.status,
            RouteOutcome::Expired(_) => DeliveryStatus::Expired,
            RouteOutcome::Failed { .. } => DeliveryStatus::Failed,
        }
    }

    pub fn message(&self) -> &MeshMessage {
        match self {
            RouteOutcome::Delivered(m) | RouteOutcome::Expired(m) => m,
            RouteOutcome::Forward(plan) => &plan.message,
            RouteOutcome::Failed { message, .. } => message,
        }
    }
}

/// Bounded FIFO of recently seen message ids.
#[derive(Debug)]
struct SeenIds {
    capacity: usize,
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl SeenIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            set: HashSet::new(),
        }
    }

    /// Returns `true` if the id is new.
    fn check_and_add(&mut self, id: &str) -> bool {
        if self.set.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        self.order.push_back(id.to_string());
        self.set.insert(id.to_string());
        true
    }
}

pub struct MessageRouter {
    config: RouterConfig,
    seen: Mutex<SeenIds>,
}

impl MessageRouter {
    pub fn new(config: RouterConfig) -> Self {
        let seen = SeenIds::new(config.dedup_capacity);
        Self {
            config,
            seen: Mutex::new(seen),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Emergency priority always floods; otherwise addressing decides.
    pub fn select_strategy(&self, message: &MeshMessage) -> RoutingStrategy {
        if message.is_emergency() {
            return RoutingStrategy::Flooding;
        }
        match message.destinations.len() {
            0 => RoutingStrategy::Broadcast,
            1 if message.kind != MessageKind::Multicast => RoutingStrategy::Unicast,
            _ => RoutingStrategy::Multicast,
        }
    }

    /// Inbound dedup: `true` the first time an id is seen.
    pub fn accept_inbound(&self, message_id: &str) -> bool {
        self.seen.lock().check_and_add(message_id)
    }

    /// Decide what `current` does with `message`.
    pub fn route(
        &self,
        message: MeshMessage,
        current: &NodeId,
        ctx: &mut dyn RoutingContext,
    ) -> RouteOutcome {
        let mut msg = message;
        if msg.status.is_terminal() {
            let reason = MeshError::Invalid(format!("message {} already {:?}", msg.id, msg.status));
            return RouteOutcome::Failed {
                message: msg,
                reason,
            };
        }

        match msg.route.iter().position(|n| n == current) {
            Some(i) if i + 1 == msg.route.len() => {}
            Some(_) => {
                tracing::warn!("Message {} looped back to {}", msg.id, current);
                return Self::fail(msg, MeshError::Invalid(format!("loop at {}", current)));
            }
            None => msg.route.push(current.clone()),
        }

        let strategy = self.select_strategy(&msg);
        let addressed_here = msg.is_addressed_to(current);
        let remaining: Vec<NodeId> = msg
            .destinations
            .iter()
            .filter(|d| *d != current)
            .cloned()
            .collect();

        if addressed_here && remaining.is_empty() {
            let _ = msg.set_status(DeliveryStatus::Delivered);
            return RouteOutcome::Delivered(msg);
        }
        let delivered_locally =
            addressed_here || (msg.destinations.is_empty() && msg.source != *current);

        if msg.ttl == 0 {
            return Self::stop(msg, delivered_locally);
        }
        let next_ttl = msg.ttl - 1;
        let visited: BTreeSet<NodeId> = msg.route.iter().cloned().collect();

        let mut targets: Vec<NodeId> = match strategy {
            RoutingStrategy::Flooding | RoutingStrategy::Broadcast => ctx
                .neighbors(current)
                .into_iter()
                .filter(|n| !visited.contains(n))
                .collect(),
            RoutingStrategy::Unicast | RoutingStrategy::Multicast => {
                let constraints = RouteConstraints {
                    avoid: visited.clone(),
                    ..RouteConstraints::default()
                };
                let mut hops = Vec::new();
                for destination in &remaining {
                    match ctx.resolve(current, destination, &constraints) {
                        Some(route) if !visited.contains(&route.next_hop) => {
                            if !hops.contains(&route.next_hop) {
                                hops.push(route.next_hop);
                            }
                        }
                        _ => tracing::debug!("No route from {} to {}", current, destination),
                    }
                }
                hops
            }
        };

        if next_ttl == 0 {
            // the last forward may only land on a destination
            targets.retain(|t| msg.is_addressed_to(t));
            if targets.is_empty() {
                return Self::stop(msg, delivered_locally);
            }
        }

        if targets.is_empty() {
            if delivered_locally {
                let _ = msg.set_status(DeliveryStatus::Delivered);
                return RouteOutcome::Delivered(msg);
            }
            let reason = match strategy {
                RoutingStrategy::Unicast | RoutingStrategy::Multicast => {
                    MeshError::NotFound(format!("route for message {}", msg.id))
                }
                _ => MeshError::Exhausted(format!("no eligible neighbours at {}", current)),
            };
            return Self::fail(msg, reason);
        }

        msg.ttl = next_ttl;
        RouteOutcome::Forward(ForwardPlan {
            strategy,
            message: msg,
            targets,
            delivered_locally,
        })
    }

    /// Fresh copy of a failed or expired message: new id, full ttl, empty route.
    pub fn retry(&self, failed: &MeshMessage, now: u64) -> Result<MeshMessage> {
        if !matches!(failed.status, DeliveryStatus::Failed | DeliveryStatus::Expired) {
            return Err(MeshError::Invalid(format!(
                "message {} is {:?}, not retryable",
                failed.id, failed.status
            )));
        }
        if failed.retry_count >= self.config.max_retries {
            return Err(MeshError::Exhausted(format!(
                "message {} used {} retries",
                failed.id, failed.retry_count
            )));
        }
        let mut retry = MeshMessage::new(
            failed.kind,
            failed.priority,
            failed.source.clone(),
            failed.destinations.clone(),
            failed.payload.clone(),
            failed.initial_ttl,
            now,
        );
        retry.retry_count = failed.retry_count + 1;
        tracing::debug!("Retrying {} as {} (attempt {})", failed.id, retry.id, retry.retry_count);
        Ok(retry)
    }

    fn stop(mut msg: MeshMessage, delivered_locally: bool) -> RouteOutcome {
        if delivered_locally {
            let _ = msg.set_status(DeliveryStatus::Delivered);
            return RouteOutcome::Delivered(msg);
        }
        tracing::debug!("Message {} expired at ttl 0", msg.id);
        let _ = msg.set_status(DeliveryStatus::Expired);
        RouteOutcome::Expired(msg)
    }

    fn fail(mut msg: MeshMessage, reason: MeshError) -> RouteOutcome {
        let _ = msg.set_status(DeliveryStatus::Failed);
        RouteOutcome::Failed {
            message: msg,
            reason,
        }
    }
}
