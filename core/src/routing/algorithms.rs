//! Route discovery algorithms
//!
//! Each algorithm takes an immutable [`ConnectionGraph`] and a
//! [`DiscoveryRequest`] and either produces a [`Route`] or nothing. All of them
//! honour the request's hop bound and avoid set, and all of them terminate on
//! cyclic graphs because every expansion is guarded by a visited set.

use super::proactive::ProactiveTable;
use super::route::Route;
use crate::config::{AlgorithmCost, DiscoveryCosts};
use crate::node::NodeId;
use crate::topology::ConnectionGraph;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Discovery algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Algorithm {
    /// On-demand breadth-first flood search (AODV-like).
    Reactive,
    /// Precomputed all-pairs next hops (OLSR-like).
    Proactive,
    /// Path-accumulating depth-first search (DSR-like).
    SourceRoute,
    /// Greedy forwarding by distance (GPSR-like).
    Geographic,
    Hybrid,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Reactive,
        Algorithm::Proactive,
        Algorithm::SourceRoute,
        Algorithm::Geographic,
        Algorithm::Hybrid,
    ];

    /// Classic protocol name.
    pub fn protocol_name(&self) -> &'static str {
        match self {
            Algorithm::Reactive => "aodv",
            Algorithm::Proactive => "olsr",
            Algorithm::SourceRoute => "dsr",
            Algorithm::Geographic => "gpsr",
            Algorithm::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::Reactive => "reactive",
            Algorithm::Proactive => "proactive",
            Algorithm::SourceRoute => "source",
            Algorithm::Geographic => "geographic",
            Algorithm::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

impl FromStr for Algorithm {
    type Err = crate::MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reactive" | "aodv" => Ok(Algorithm::Reactive),
            "proactive" | "olsr" => Ok(Algorithm::Proactive),
            "source" | "source-route" | "source_route" | "dsr" => Ok(Algorithm::SourceRoute),
            "geographic" | "gpsr" => Ok(Algorithm::Geographic),
            "hybrid" => Ok(Algorithm::Hybrid),
            other => Err(crate::MeshError::Invalid(format!(
                "unknown routing algorithm '{}'",
                other
            ))),
        }
    }
}

/// One discovery: who is asking, for whom, under which bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryRequest {
    pub source: NodeId,
    pub destination: NodeId,
    pub emergency: bool,
    pub max_hops: u32,
    /// Nodes the path must not cross. The source itself is always allowed.
    pub avoid: BTreeSet<NodeId>,
}

impl DiscoveryRequest {
    pub fn new(source: impl Into<NodeId>, destination: impl Into<NodeId>, max_hops: u32) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            emergency: false,
            max_hops,
            avoid: BTreeSet::new(),
        }
    }

    pub fn with_emergency(mut self, emergency: bool) -> Self {
        self.emergency = emergency;
        self
    }

    pub fn avoiding(mut self, avoid: BTreeSet<NodeId>) -> Self {
        self.avoid = avoid;
        self
    }

    fn blocked(&self, node: &str) -> bool {
        node != self.source && self.avoid.contains(node)
    }

    fn is_well_formed(&self, graph: &ConnectionGraph) -> bool {
        self.source != self.destination
            && self.max_hops > 0
            && graph.contains(&self.source)
            && graph.contains(&self.destination)
            && !self.blocked(&self.destination)
    }
}

/// Turn a source-first path into a route using `cost`.
pub fn route_from_path(
    path: &[NodeId],
    graph: &ConnectionGraph,
    cost: &AlgorithmCost,
    algorithm: Algorithm,
    emergency: bool,
    now: u64,
) -> Option<Route> {
    if path.len() < 2 {
        return None;
    }
    let hops = (path.len() - 1) as u32;
    let destination = path[path.len() - 1].clone();
    Some(Route {
        metric: cost.metric(hops, graph.signal(&destination)),
        reliability: cost.reliability(hops),
        bandwidth: cost.bandwidth(hops),
        destination,
        next_hop: path[1].clone(),
        hop_count: hops,
        is_active: true,
        emergency_priority: emergency,
        last_updated: now,
        path: (algorithm == Algorithm::SourceRoute).then(|| path.to_vec()),
        algorithm,
    })
}

// ============================================================================
// PATH SEARCHES
// ============================================================================

/// Breadth-first search; first path to reach the destination wins.
pub fn bfs_path(graph: &ConnectionGraph, req: &DiscoveryRequest) -> Option<Vec<NodeId>> {
    if !req.is_well_formed(graph) {
        return None;
    }
    let mut parent: HashMap<&NodeId, &NodeId> = HashMap::new();
    let mut depth: HashMap<&NodeId, u32> = HashMap::new();
    let mut queue: VecDeque<&NodeId> = VecDeque::new();
    let source = graph.node_ids().find(|id| **id == req.source)?;
    depth.insert(source, 0);
    queue.push_back(source);

    while let Some(current) = queue.pop_front() {
        let d = depth[current];
        if d >= req.max_hops {
            continue;
        }
        for next in graph.neighbors(current) {
            if depth.contains_key(next) || req.blocked(next) {
                continue;
            }
            depth.insert(next, d + 1);
            parent.insert(next, current);
            if *next == req.destination {
                let mut path = vec![next.clone()];
                let mut cursor = next;
                while let Some(&prev) = parent.get(cursor) {
                    path.push(prev.clone());
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back(next);
        }
    }
    None
}

/// Depth-first search accumulating the full path. A node is re-expanded only
/// when reached at a strictly smaller depth, which bounds the work.
pub fn dfs_path(graph: &ConnectionGraph, req: &DiscoveryRequest) -> Option<Vec<NodeId>> {
    if !req.is_well_formed(graph) {
        return None;
    }
    let mut best_depth: HashMap<NodeId, usize> = HashMap::new();
    let mut stack: Vec<Vec<NodeId>> = vec![vec![req.source.clone()]];
    best_depth.insert(req.source.clone(), 0);

    while let Some(path) = stack.pop() {
        let Some(current) = path.last() else {
            continue;
        };
        if *current == req.destination {
            return Some(path);
        }
        let depth = path.len() - 1;
        if depth as u32 >= req.max_hops {
            continue;
        }
        // Reverse so the smallest id is explored first.
        let mut neighbors: Vec<&NodeId> = graph.neighbors(current).collect();
        neighbors.reverse();
        for next in neighbors {
            if req.blocked(next) || path.contains(next) {
                continue;
            }
            let next_depth = depth + 1;
            if best_depth.get(next).is_some_and(|d| *d <= next_depth) {
                continue;
            }
            best_depth.insert(next.clone(), next_depth);
            let mut extended = path.clone();
            extended.push(next.clone());
            stack.push(extended);
        }
    }
    None
}

/// Greedy forwarding: always step to the neighbour closest to the
/// destination, provided it is strictly closer than the current node.
/// `None` at a local minimum or when positions are missing.
pub fn greedy_path(graph: &ConnectionGraph, req: &DiscoveryRequest) -> Option<Vec<NodeId>> {
    if !req.is_well_formed(graph) {
        return None;
    }
    let target = graph.position(&req.destination)?;
    let mut current = req.source.clone();
    let mut current_distance = graph.position(&current)?.distance_to(target)?;
    let mut path = vec![current.clone()];

    while current != req.destination {
        if path.len() as u32 > req.max_hops {
            return None;
        }
        let mut best: Option<(f64, &NodeId)> = None;
        for next in graph.neighbors(&current) {
            if req.blocked(next) || path.contains(next) {
                continue;
            }
            let Some(d) = graph.position(next).and_then(|p| p.distance_to(target)) else {
                continue;
            };
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, next));
            }
        }
        let (distance, next) = best?;
        if distance >= current_distance {
            return None;
        }
        current = next.clone();
        current_distance = distance;
        path.push(current.clone());
    }
    Some(path)
}

// ============================================================================
// ALGORITHMS
// ============================================================================

pub fn reactive(
    graph: &ConnectionGraph,
    req: &DiscoveryRequest,
    costs: &DiscoveryCosts,
    now: u64,
) -> Option<Route> {
    let path = bfs_path(graph, req)?;
    route_from_path(&path, graph, &costs.reactive, Algorithm::Reactive, req.emergency, now)
}

/// Lookup against a precomputed table. Misses when the table path crosses
/// an avoided node or exceeds the hop bound.
pub fn proactive(
    table: &ProactiveTable,
    graph: &ConnectionGraph,
    req: &DiscoveryRequest,
    costs: &DiscoveryCosts,
    now: u64,
) -> Option<Route> {
    if !req.is_well_formed(graph) {
        return None;
    }
    let (_, hops) = table.lookup(&req.source, &req.destination)?;
    if hops > req.max_hops {
        return None;
    }
    let path = table.path(&req.source, &req.destination)?;
    if path.iter().any(|n| req.blocked(n)) {
        return None;
    }
    route_from_path(&path, graph, &costs.proactive, Algorithm::Proactive, req.emergency, now)
}

pub fn source_route(
    graph: &ConnectionGraph,
    req: &DiscoveryRequest,
    costs: &DiscoveryCosts,
    now: u64,
) -> Option<Route> {
    let path = dfs_path(graph, req)?;
    route_from_path(
        &path,
        graph,
        &costs.source_route,
        Algorithm::SourceRoute,
        req.emergency,
        now,
    )
}

/// Greedy geographic forwarding without fallback.
pub fn geographic_only(
    graph: &ConnectionGraph,
    req: &DiscoveryRequest,
    costs: &DiscoveryCosts,
    now: u64,
) -> Option<Route> {
    let path = greedy_path(graph, req)?;
    route_from_path(&path, graph, &costs.geographic, Algorithm::Geographic, req.emergency, now)
}

/// Greedy geographic forwarding, falling back to reactive search at a local minimum.
pub fn geographic(
    graph: &ConnectionGraph,
    req: &DiscoveryRequest,
    costs: &DiscoveryCosts,
    now: u64,
) -> Option<Route> {
    geographic_only(graph, req, costs, now).or_else(|| {
        tracing::trace!(
            "Geographic forwarding stuck towards {}, falling back to reactive",
            req.destination
        );
        reactive(graph, req, costs, now)
    })
}

/// Geographic first; reactive when the request is an emergency or geographic
/// fails; proactive alongside to break ties. Lowest metric wins, and on an
/// exact tie the proactive candidate is preferred.
pub fn hybrid(
    graph: &ConnectionGraph,
    table: Option<&ProactiveTable>,
    req: &DiscoveryRequest,
    costs: &DiscoveryCosts,
    now: u64,
) -> Option<Route> {
    let mut candidates = Vec::new();
    let geo = geographic_only(graph, req, costs, now);
    let geo_failed = geo.is_none();
    candidates.extend(geo);
    if req.emergency || geo_failed {
        candidates.extend(reactive(graph, req, costs, now));
    }
    if let Some(table) = table {
        candidates.extend(proactive(table, graph, req, costs, now));
    }
    candidates.into_iter().min_by(|a, b| {
        a.metric
            .partial_cmp(&b.metric)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| tie_rank(a.algorithm).cmp(&tie_rank(b.algorithm)))
            .then_with(|| a.hop_count.cmp(&b.hop_count))
    })
}

fn tie_rank(algorithm: Algorithm) -> u8 {
    match algorithm {
        Algorithm::Proactive => 0,
        Algorithm::Geographic => 1,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Position;

    fn line() -> ConnectionGraph {
        ConnectionGraph::from_edges(&[("1", "2"), ("2", "3"), ("3", "4"), ("4", "5")])
    }

    fn ring(n: usize) -> ConnectionGraph {
        let ids: Vec<String> = (0..n).map(|i| format!("n{:02}", i)).collect();
        let edges: Vec<(&str, &str)> = (0..n)
            .map(|i| (ids[i].as_str(), ids[(i + 1) % n].as_str()))
            .collect();
        ConnectionGraph::from_edges(&edges)
    }

    #[test]
    fn test_algorithm_aliases() {
        assert_eq!("aodv".parse::<Algorithm>().unwrap(), Algorithm::Reactive);
        assert_eq!("OLSR".parse::<Algorithm>().unwrap(), Algorithm::Proactive);
        assert_eq!("dsr".parse::<Algorithm>().unwrap(), Algorithm::SourceRoute);
        assert_eq!("gpsr".parse::<Algorithm>().unwrap(), Algorithm::Geographic);
        assert!("carrier-pigeon".parse::<Algorithm>().is_err());
        assert_eq!(Algorithm::SourceRoute.to_string(), "source");
    }

    #[test]
    fn test_reactive_on_line() {
        let g = line();
        let r = reactive(&g, &DiscoveryRequest::new("1", "5", 10), &DiscoveryCosts::default(), 0)
            .unwrap();
        assert_eq!(r.hop_count, 4);
        assert_eq!(r.next_hop, "2");
        assert_eq!(r.metric, 90.0);
        assert!(r.path.is_none());
    }

    #[test]
    fn test_hop_bound_is_respected() {
        let g = line();
        let req = DiscoveryRequest::new("1", "5", 3);
        let costs = DiscoveryCosts::default();
        assert!(reactive(&g, &req, &costs, 0).is_none());
        assert!(source_route(&g, &req, &costs, 0).is_none());
        let table = ProactiveTable::compute(&g);
        assert!(proactive(&table, &g, &req, &costs, 0).is_none());
    }

    #[test]
    fn test_avoid_set_blocks_path() {
        let g = ConnectionGraph::from_edges(&[("s", "a"), ("a", "d"), ("s", "b"), ("b", "c"), ("c", "d")]);
        let costs = DiscoveryCosts::default();
        let req = DiscoveryRequest::new("s", "d", 10).avoiding(BTreeSet::from(["a".to_string()]));
        let r = reactive(&g, &req, &costs, 0).unwrap();
        assert_eq!(r.next_hop, "b");
        assert_eq!(r.hop_count, 3);
        let table = ProactiveTable::compute(&g);
        assert!(proactive(&table, &g, &req, &costs, 0).is_none());
    }

    #[test]
    fn test_source_route_carries_path() {
        let g = line();
        let r = source_route(&g, &DiscoveryRequest::new("1", "5", 10), &DiscoveryCosts::default(), 0)
            .unwrap();
        assert_eq!(r.path.unwrap(), vec!["1", "2", "3", "4", "5"]);
        assert_eq!(r.hop_count, 4);
        assert_eq!(r.metric, 60.0);
    }

    #[test]
    fn test_searches_terminate_on_cycles() {
        let g = ring(12);
        let costs = DiscoveryCosts::default();
        let req = DiscoveryRequest::new("n00", "n06", 10);
        assert_eq!(reactive(&g, &req, &costs, 0).unwrap().hop_count, 6);
        assert_eq!(source_route(&g, &req, &costs, 0).unwrap().hop_count, 6);
        let missing = DiscoveryRequest::new("n00", "nope", 10);
        assert!(reactive(&g, &missing, &costs, 0).is_none());
        assert!(source_route(&g, &missing, &costs, 0).is_none());
    }

    #[test]
    fn test_self_route_is_none() {
        let g = line();
        assert!(reactive(&g, &DiscoveryRequest::new("1", "1", 10), &DiscoveryCosts::default(), 0).is_none());
    }

    fn planar(g: ConnectionGraph, coords: &[(&str, f64, f64)]) -> ConnectionGraph {
        coords.iter().fold(g, |g, (id, x, y)| {
            g.with_position(id, Position::Planar { x: *x, y: *y })
        })
    }

    #[test]
    fn test_greedy_progress() {
        let g = planar(
            line(),
            &[("1", 0.0, 0.0), ("2", 1.0, 0.0), ("3", 2.0, 0.0), ("4", 3.0, 0.0), ("5", 4.0, 0.0)],
        );
        let r = geographic(&g, &DiscoveryRequest::new("1", "5", 10), &DiscoveryCosts::default(), 0)
            .unwrap();
        assert_eq!(r.algorithm, Algorithm::Geographic);
        assert_eq!(r.metric, 40.0);
    }

    #[test]
    fn test_greedy_local_minimum_falls_back_to_reactive() {
        // s is closer to d than its only neighbour w, which detours to d
        let g = ConnectionGraph::from_edges(&[("s", "w"), ("w", "d")]);
        let g = planar(g, &[("s", 0.0, 0.0), ("w", -5.0, 0.0), ("d", 3.0, 0.0)]);
        let req = DiscoveryRequest::new("s", "d", 10);
        let costs = DiscoveryCosts::default();
        assert!(geographic_only(&g, &req, &costs, 0).is_none());
        let r = geographic(&g, &req, &costs, 0).unwrap();
        assert_eq!(r.algorithm, Algorithm::Reactive);
        assert_eq!(r.next_hop, "w");
    }

    #[test]
    fn test_hybrid_prefers_lowest_metric() {
        let g = planar(
            line(),
            &[("1", 0.0, 0.0), ("2", 1.0, 0.0), ("3", 2.0, 0.0), ("4", 3.0, 0.0), ("5", 4.0, 0.0)],
        );
        let costs = DiscoveryCosts::default();
        let table = ProactiveTable::compute(&g);
        let calm = hybrid(&g, Some(&table), &DiscoveryRequest::new("1", "5", 10), &costs, 0).unwrap();
        assert_eq!(calm.algorithm, Algorithm::Geographic);

        // without positions geographic fails; reactive (90) loses to proactive (80)
        let bare = line();
        let table = ProactiveTable::compute(&bare);
        let r = hybrid(&bare, Some(&table), &DiscoveryRequest::new("1", "5", 10), &costs, 0).unwrap();
        assert_eq!(r.algorithm, Algorithm::Proactive);
        let r = hybrid(&bare, None, &DiscoveryRequest::new("1", "5", 10), &costs, 0).unwrap();
        assert_eq!(r.algorithm, Algorithm::Reactive);
    }

    #[test]
    fn test_hybrid_tie_goes_to_proactive() {
        let mut costs = DiscoveryCosts::default();
        costs.geographic = costs.proactive;
        let g = planar(
            line(),
            &[("1", 0.0, 0.0), ("2", 1.0, 0.0), ("3", 2.0, 0.0), ("4", 3.0, 0.0), ("5", 4.0, 0.0)],
        );
        let table = ProactiveTable::compute(&g);
        let r = hybrid(&g, Some(&table), &DiscoveryRequest::new("1", "5", 10), &costs, 0).unwrap();
        assert_eq!(r.algorithm, Algorithm::Proactive);
    }

    #[test]
    fn test_emergency_flag_marks_route() {
        let g = line();
        let req = DiscoveryRequest::new("1", "3", 10).with_emergency(true);
        let r = reactive(&g, &req, &DiscoveryCosts::default(), 7).unwrap();
        assert!(r.emergency_priority);
        assert_eq!(r.last_updated, 7);
    }
}
