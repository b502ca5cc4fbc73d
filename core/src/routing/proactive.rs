// Proactive all-pairs next-hop table (Floyd–Warshall).

use crate::node::NodeId;
use crate::topology::ConnectionGraph;
use std::collections::HashMap;

const UNREACHABLE: u32 = u32::MAX;

/// All-pairs shortest hop counts and next hops for one topology version.
#[derive(Debug, Clone)]
pub struct ProactiveTable {
    version: u64,
    index: HashMap<NodeId, usize>,
    ids: Vec<NodeId>,
    dist: Vec<Vec<u32>>,
    next: Vec<Vec<Option<usize>>>,
}

impl ProactiveTable {
    pub fn compute(graph: &ConnectionGraph) -> Self {
        let ids: Vec<NodeId> = graph.node_ids().cloned().collect();
        let index: HashMap<NodeId, usize> =
            ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        let n = ids.len();
        let mut dist = vec![vec![UNREACHABLE; n]; n];
        let mut next = vec![vec![None; n]; n];

        for (i, id) in ids.iter().enumerate() {
            dist[i][i] = 0;
            next[i][i] = Some(i);
            for peer in graph.neighbors(id) {
                if let Some(&j) = index.get(peer) {
                    dist[i][j] = 1;
                    next[i][j] = Some(j);
                }
            }
        }

        for k in 0..n {
            for i in 0..n {
                if dist[i][k] == UNREACHABLE {
                    continue;
                }
                for j in 0..n {
                    if dist[k][j] == UNREACHABLE {
                        continue;
                    }
                    let through = dist[i][k] + dist[k][j];
                    if through < dist[i][j] {
                        dist[i][j] = through;
                        next[i][j] = next[i][k];
                    }
                }
            }
        }

        tracing::debug!(
            "Proactive table computed for {} nodes at version {}",
            n,
            graph.version()
        );
        Self {
            version: graph.version(),
            index,
            ids,
            dist,
            next,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_stale(&self, graph: &ConnectionGraph) -> bool {
        self.version != graph.version()
    }

    pub fn node_count(&self) -> usize {
        self.ids.len()
    }

    /// Next hop and hop count, O(1).
    pub fn lookup(&self, source: &str, destination: &str) -> Option<(NodeId, u32)> {
        let i = *self.index.get(source)?;
        let j = *self.index.get(destination)?;
        if i == j || self.dist[i][j] == UNREACHABLE {
            return None;
        }
        let hop = self.next[i][j]?;
        Some((self.ids[hop].clone(), self.dist[i][j]))
    }

    /// Full path by following next hops.
    pub fn path(&self, source: &str, destination: &str) -> Option<Vec<NodeId>> {
        let mut i = *self.index.get(source)?;
        let j = *self.index.get(destination)?;
        if i == j || self.dist[i][j] == UNREACHABLE {
            return None;
        }
        let mut path = vec![self.ids[i].clone()];
        while i != j {
            i = self.next[i][j]?;
            path.push(self.ids[i].clone());
            if path.len() > self.ids.len() {
                return None;
            }
        }
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_lookup() {
        let g = ConnectionGraph::from_edges(&[("1", "2"), ("2", "3"), ("3", "4"), ("4", "5")]);
        let table = ProactiveTable::compute(&g);
        assert_eq!(table.lookup("1", "5"), Some(("2".to_string(), 4)));
        assert_eq!(table.lookup("5", "1"), Some(("4".to_string(), 4)));
        assert_eq!(
            table.path("1", "5").unwrap(),
            vec!["1", "2", "3", "4", "5"]
        );
        assert_eq!(table.lookup("1", "1"), None);
    }

    #[test]
    fn test_unreachable_and_unknown() {
        let mut g = ConnectionGraph::from_edges(&[("a", "b")]);
        g.add_node("c");
        let table = ProactiveTable::compute(&g);
        assert_eq!(table.lookup("a", "c"), None);
        assert_eq!(table.lookup("a", "zzz"), None);
    }

    #[test]
    fn test_staleness_follows_graph_version() {
        let mut g = ConnectionGraph::from_edges(&[("a", "b")]);
        let table = ProactiveTable::compute(&g);
        assert!(!table.is_stale(&g));
        g.add_edge("b", "c");
        assert!(table.is_stale(&g));
    }

    #[test]
    fn test_shortcut_is_taken() {
        let g = ConnectionGraph::from_edges(&[("a", "b"), ("b", "c"), ("c", "d"), ("a", "d")]);
        let table = ProactiveTable::compute(&g);
        assert_eq!(table.lookup("a", "d"), Some(("d".to_string(), 1)));
        assert_eq!(table.lookup("a", "c").map(|(_, h)| h), Some(2));
    }
}
