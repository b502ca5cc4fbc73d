// Integration tests for message routing
//
// Drives messages hop by hop over real route discovery and checks TTL
// accounting, loop freedom and the last-hop expiry rule.

use meshaid_core::config::{DiscoveryCosts, RouterConfig};
use meshaid_core::message::{
    DeliveryStatus, MeshMessage, MessageKind, MessageRouter, Priority, RouteOutcome,
    RoutingContext, RoutingStrategy,
};
use meshaid_core::node::NodeId;
use meshaid_core::routing::{
    Algorithm, DiscoveryRequest, Route, RouteConstraints, RouteDiscoveryEngine,
};
use meshaid_core::topology::ConnectionGraph;
use std::collections::{HashSet, VecDeque};

/// Routing context that answers from a fixed graph using reactive discovery.
struct GraphContext {
    graph: ConnectionGraph,
    engine: RouteDiscoveryEngine,
}

impl GraphContext {
    fn new(edges: &[(&str, &str)]) -> Self {
        Self {
            graph: ConnectionGraph::from_edges(edges),
            engine: RouteDiscoveryEngine::new(DiscoveryCosts::default()),
        }
    }
}

impl RoutingContext for GraphContext {
    fn neighbors(&self, node: &NodeId) -> Vec<NodeId> {
        self.graph.neighbors(node).cloned().collect()
    }

    fn resolve(
        &mut self,
        node: &NodeId,
        destination: &NodeId,
        constraints: &RouteConstraints,
    ) -> Option<Route> {
        let request = DiscoveryRequest::new(node.clone(), destination.clone(), 16)
            .avoiding(constraints.avoid.clone());
        self.engine
            .discover(&self.graph, request, Algorithm::Reactive, 0)
            .into_result()
            .ok()
    }
}

/// Every copy delivered, expired or failed while walking the mesh.
#[derive(Default)]
struct Walk {
    delivered: Vec<MeshMessage>,
    expired: Vec<MeshMessage>,
    failed: Vec<MeshMessage>,
    forwards: usize,
}

/// Push `message` from `start` until every copy reaches a terminal state.
fn walk(router: &MessageRouter, ctx: &mut GraphContext, start: &str, message: MeshMessage) -> Walk {
    let mut out = Walk::default();
    let mut queue: VecDeque<(NodeId, MeshMessage)> = VecDeque::new();
    queue.push_back((start.to_string(), message));

    while let Some((node, msg)) = queue.pop_front() {
        let ttl_in = msg.ttl;
        match router.route(msg, &node, ctx) {
            RouteOutcome::Forward(plan) => {
                assert_eq!(plan.message.ttl + 1, ttl_in, "ttl must drop by one per forward");
                let unique: HashSet<&NodeId> = plan.message.route.iter().collect();
                assert_eq!(unique.len(), plan.message.route.len(), "route revisits a node");
                for target in &plan.targets {
                    assert!(!plan.message.has_visited(target));
                    out.forwards += 1;
                    queue.push_back((target.clone(), plan.message.clone()));
                }
                if plan.delivered_locally {
                    out.delivered.push(plan.message.clone());
                }
            }
            RouteOutcome::Delivered(m) => out.delivered.push(m),
            RouteOutcome::Expired(m) => out.expired.push(m),
            RouteOutcome::Failed { message, .. } => out.failed.push(message),
        }
        assert!(out.forwards < 10_000, "walk did not terminate");
    }
    out
}

fn router() -> MessageRouter {
    MessageRouter::new(RouterConfig::default())
}

#[test]
fn test_ttl_one_at_intermediate_node_expires() {
    // a - b - c - d; the message reaches b with one forward left, but b's
    // only way on is c, which is not the destination
    let mut ctx = GraphContext::new(&[("a", "b"), ("b", "c"), ("c", "d")]);
    let mut msg = MeshMessage::unicast("a", "d", b"water at the school".to_vec(), 1, 0);
    msg.route = vec!["a".to_string()];

    let outcome = router().route(msg, &"b".to_string(), &mut ctx);
    assert!(matches!(outcome, RouteOutcome::Expired(_)), "{:?}", outcome);
    assert_eq!(outcome.status(), DeliveryStatus::Expired);
    assert_eq!(outcome.message().route, vec!["a", "b"]);

    println!("✓ ttl=1 at an intermediate node expires instead of forwarding");
}

#[test]
fn test_ttl_one_next_to_destination_still_delivers() {
    let mut ctx = GraphContext::new(&[("a", "b"), ("b", "c")]);
    let mut msg = MeshMessage::unicast("a", "c", vec![], 1, 0);
    msg.route = vec!["a".to_string()];

    let RouteOutcome::Forward(plan) = router().route(msg, &"b".to_string(), &mut ctx) else {
        panic!("expected the last forward to go to the destination");
    };
    assert_eq!(plan.targets, vec!["c"]);
    assert_eq!(plan.message.ttl, 0);

    let outcome = router().route(plan.message, &"c".to_string(), &mut ctx);
    assert_eq!(outcome.status(), DeliveryStatus::Delivered);
}

#[test]
fn test_unicast_walks_the_line() {
    let mut ctx = GraphContext::new(&[("1", "2"), ("2", "3"), ("3", "4"), ("4", "5")]);
    let msg = MeshMessage::unicast("1", "5", b"ping".to_vec(), 10, 0);
    let result = walk(&router(), &mut ctx, "1", msg);

    assert_eq!(result.delivered.len(), 1);
    assert!(result.expired.is_empty());
    assert!(result.failed.is_empty());
    let delivered = &result.delivered[0];
    assert_eq!(delivered.route, vec!["1", "2", "3", "4", "5"]);
    assert_eq!(delivered.hop_count(), 4);
    assert_eq!(delivered.ttl, 6);

    println!("✓ Unicast crosses a 5-node line in 4 forwards");
}

#[test]
fn test_short_ttl_never_reaches_far_destination() {
    let mut ctx = GraphContext::new(&[("1", "2"), ("2", "3"), ("3", "4"), ("4", "5")]);
    let msg = MeshMessage::unicast("1", "5", vec![], 2, 0);
    let result = walk(&router(), &mut ctx, "1", msg);

    assert!(result.delivered.is_empty());
    assert_eq!(result.expired.len(), 1);
    assert!(result.expired[0].route.len() <= 3);
}

#[test]
fn test_emergency_flood_is_loop_free() {
    // ring of six with two chords
    let mut ctx = GraphContext::new(&[
        ("n0", "n1"),
        ("n1", "n2"),
        ("n2", "n3"),
        ("n3", "n4"),
        ("n4", "n5"),
        ("n5", "n0"),
        ("n0", "n3"),
        ("n1", "n4"),
    ]);
    let msg = MeshMessage::new(
        MessageKind::Emergency,
        Priority::Emergency,
        "n0",
        vec!["n2".to_string()],
        b"trapped, need help".to_vec(),
        6,
        0,
    );
    let r = router();
    assert_eq!(r.select_strategy(&msg), RoutingStrategy::Flooding);

    let result = walk(&r, &mut ctx, "n0", msg);
    assert!(!result.delivered.is_empty());
    for copy in result
        .delivered
        .iter()
        .chain(result.expired.iter())
        .chain(result.failed.iter())
    {
        let unique: HashSet<&NodeId> = copy.route.iter().collect();
        assert_eq!(unique.len(), copy.route.len());
        assert!(copy.hop_count() as u32 <= 6);
    }

    println!("✓ Emergency flooding terminates without revisiting nodes");
}

#[test]
fn test_broadcast_reaches_every_node() {
    let mut ctx = GraphContext::new(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "e")]);
    let msg = MeshMessage::new(MessageKind::Broadcast, Priority::Normal, "a", vec![], vec![], 5, 0);
    let result = walk(&router(), &mut ctx, "a", msg);

    let reached: HashSet<NodeId> = result
        .delivered
        .iter()
        .filter_map(|m| m.route.last().cloned())
        .collect();
    for node in ["b", "c", "d", "e"] {
        assert!(reached.contains(node), "{} never got the broadcast", node);
    }
    assert!(!reached.contains("a"));
}

#[test]
fn test_unreachable_destination_fails() {
    let mut ctx = GraphContext::new(&[("a", "b"), ("x", "y")]);
    let msg = MeshMessage::unicast("a", "y", vec![], 5, 0);
    let result = walk(&router(), &mut ctx, "a", msg);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].status, DeliveryStatus::Failed);

    let retry = router().retry(&result.failed[0], 100).unwrap();
    assert_eq!(retry.retry_count, 1);
    assert_eq!(retry.ttl, 5);
    assert_eq!(retry.timestamp, 100);
}
