// Connection graph: immutable view of live links between online nodes.
//
// Built from a registry snapshot; all traversal runs over BTree collections
// so iteration order, and therefore every discovery result, is deterministic.

use crate::node::{Node, NodeId, Position};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionGraph {
    version: u64,
    adjacency: BTreeMap<NodeId, BTreeSet<NodeId>>,
    positions: BTreeMap<NodeId, Position>,
    signal: BTreeMap<NodeId, f64>,
}

impl ConnectionGraph {
    /// Graph over the online members of `nodes`; links to offline or unknown
    /// peers are left out.
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a Node>, version: u64) -> Self {
        let online: BTreeMap<&NodeId, &Node> = nodes
            .into_iter()
            .filter(|n| n.is_online())
            .map(|n| (&n.id, n))
            .collect();

        let mut graph = ConnectionGraph {
            version,
            ..Default::default()
        };
        for (id, node) in &online {
            let links = node
                .connections
                .iter()
                .filter(|peer| online.contains_key(peer))
                .cloned()
                .collect();
            graph.adjacency.insert((*id).clone(), links);
            if let Some(position) = node.position {
                graph.positions.insert((*id).clone(), position);
            }
            graph.signal.insert((*id).clone(), node.signal_strength);
        }
        graph
    }

    /// Undirected graph from an edge list; every node at full signal.
    pub fn from_edges(edges: &[(&str, &str)]) -> Self {
        let mut graph = ConnectionGraph::default();
        for (a, b) in edges {
            graph.add_edge(a, b);
        }
        graph
    }

    pub fn add_node(&mut self, id: &str) {
        self.adjacency.entry(id.to_string()).or_default();
        self.signal.entry(id.to_string()).or_insert(100.0);
    }

    pub fn add_edge(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        self.add_node(a);
        self.add_node(b);
        if let Some(set) = self.adjacency.get_mut(a) {
            set.insert(b.to_string());
        }
        if let Some(set) = self.adjacency.get_mut(b) {
            set.insert(a.to_string());
        }
        self.version += 1;
    }

    pub fn with_position(mut self, id: &str, position: Position) -> Self {
        self.positions.insert(id.to_string(), position);
        self
    }

    pub fn with_signal(mut self, id: &str, signal: f64) -> Self {
        self.signal.insert(id.to_string(), signal);
        self
    }

    /// Topology version the graph was built from.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contains(&self, id: &str) -> bool {
        self.adjacency.contains_key(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.adjacency.keys()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Undirected edge count.
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(|s| s.len()).sum::<usize>() / 2
    }

    pub fn neighbors(&self, id: &str) -> impl Iterator<Item = &NodeId> {
        self.adjacency.get(id).into_iter().flatten()
    }

    pub fn are_linked(&self, a: &str, b: &str) -> bool {
        self.adjacency.get(a).is_some_and(|s| s.contains(b))
    }

    pub fn degree(&self, id: &str) -> usize {
        self.adjacency.get(id).map_or(0, |s| s.len())
    }

    pub fn position(&self, id: &str) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn signal(&self, id: &str) -> f64 {
        self.signal.get(id).copied().unwrap_or(100.0)
    }

    /// Every A→B edge has a matching B→A edge.
    pub fn is_symmetric(&self) -> bool {
        self.adjacency
            .iter()
            .all(|(a, peers)| peers.iter().all(|b| self.are_linked(b, a)))
    }

    /// Hop distance from `source` to every reachable node.
    pub fn bfs_distances(&self, source: &str) -> BTreeMap<NodeId, u32> {
        let mut dist = BTreeMap::new();
        if !self.contains(source) {
            return dist;
        }
        let mut queue = VecDeque::new();
        dist.insert(source.to_string(), 0);
        queue.push_back(source.to_string());
        while let Some(current) = queue.pop_front() {
            let d = dist[&current];
            for next in self.neighbors(&current) {
                if !dist.contains_key(next) {
                    dist.insert(next.clone(), d + 1);
                    queue.push_back(next.clone());
                }
            }
        }
        dist
    }

    /// Connected components, each sorted, largest first.
    pub fn components(&self) -> Vec<Vec<NodeId>> {
        let mut seen = BTreeSet::new();
        let mut components = Vec::new();
        for id in self.adjacency.keys() {
            if seen.contains(id) {
                continue;
            }
            let component: Vec<NodeId> = self.bfs_distances(id).into_keys().collect();
            seen.extend(component.iter().cloned());
            components.push(component);
        }
        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        components
    }

    pub fn is_partitioned(&self) -> bool {
        self.components().len() > 1
    }

    /// Longest shortest path between any two mutually reachable nodes.
    pub fn diameter(&self) -> u32 {
        self.adjacency
            .keys()
            .filter_map(|id| self.bfs_distances(id).into_values().max())
            .max()
            .unwrap_or(0)
    }

    /// Mean shortest-path length over reachable ordered pairs.
    pub fn average_path_length(&self) -> f64 {
        let mut total = 0u64;
        let mut pairs = 0u64;
        for id in self.adjacency.keys() {
            for (_, d) in self.bfs_distances(id) {
                if d > 0 {
                    total += d as u64;
                    pairs += 1;
                }
            }
        }
        if pairs == 0 {
            0.0
        } else {
            total as f64 / pairs as f64
        }
    }

    /// Average local clustering coefficient; nodes with degree < 2 count as 0.
    pub fn clustering_coefficient(&self) -> f64 {
        if self.adjacency.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .adjacency
            .values()
            .map(|peers| {
                let k = peers.len();
                if k < 2 {
                    return 0.0;
                }
                let peers: Vec<&NodeId> = peers.iter().collect();
                let mut links = 0usize;
                for i in 0..peers.len() {
                    for j in (i + 1)..peers.len() {
                        if self.are_linked(peers[i], peers[j]) {
                            links += 1;
                        }
                    }
                }
                (2 * links) as f64 / (k * (k - 1)) as f64
            })
            .sum();
        sum / self.adjacency.len() as f64
    }

    /// Directed links over the possible n(n−1), as a percentage.
    pub fn edge_density(&self) -> f64 {
        let n = self.node_count();
        if n < 2 {
            return 0.0;
        }
        let directed: usize = self.adjacency.values().map(|s| s.len()).sum();
        directed as f64 / (n * (n - 1)) as f64 * 100.0
    }
}
