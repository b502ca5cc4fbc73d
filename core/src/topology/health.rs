// Health, coverage and summary statistics for a set of nodes.

use super::graph::ConnectionGraph;
use crate::config::TopologyConfig;
use crate::node::{Node, Position};
use crate::platform::location::haversine_distance;
use serde::{Deserialize, Serialize};

/// Weighted health in [0, 100] from mean battery, mean signal and the share
/// of online nodes that have at least one live link.
pub fn compute_health(nodes: &[Node], config: &TopologyConfig) -> f64 {
    let online: Vec<&Node> = nodes.iter().filter(|n| n.is_online()).collect();
    if online.is_empty() {
        return 0.0;
    }
    let count = online.len() as f64;
    let avg_battery = online.iter().map(|n| n.battery_level).sum::<f64>() / count;
    let avg_signal = online.iter().map(|n| n.signal_strength).sum::<f64>() / count;
    let online_ids: std::collections::BTreeSet<&str> =
        online.iter().map(|n| n.id.as_str()).collect();
    let connected = online
        .iter()
        .filter(|n| n.connections.iter().any(|c| online_ids.contains(c.as_str())))
        .count() as f64;
    let connectivity = if online.len() == 1 {
        100.0
    } else {
        connected / count * 100.0
    };

    let total_weight = config.battery_weight + config.signal_weight + config.connectivity_weight;
    if total_weight <= 0.0 {
        return 0.0;
    }
    let health = (avg_battery * config.battery_weight
        + avg_signal * config.signal_weight
        + connectivity * config.connectivity_weight)
        / total_weight;
    health.clamp(0.0, 100.0)
}

/// Circle enclosing a network's members.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub center: Position,
    pub radius: f64,
    pub area: f64,
}

impl Coverage {
    pub fn circle(center: Position, radius: f64) -> Self {
        Self {
            center,
            radius,
            area: std::f64::consts::PI * radius * radius,
        }
    }

    /// Centroid of the known positions plus the furthest member distance and
    /// `buffer`. Geo positions take precedence over planar ones.
    pub fn from_positions(positions: &[Position], buffer: f64) -> Option<Self> {
        let geo: Vec<(f64, f64)> = positions
            .iter()
            .filter_map(|p| match p {
                Position::Geo { lat, lon } => Some((*lat, *lon)),
                _ => None,
            })
            .collect();
        if !geo.is_empty() {
            let n = geo.len() as f64;
            let lat = geo.iter().map(|p| p.0).sum::<f64>() / n;
            let lon = geo.iter().map(|p| p.1).sum::<f64>() / n;
            let max = geo
                .iter()
                .map(|(a, b)| haversine_distance(lat, lon, *a, *b))
                .fold(0.0, f64::max);
            return Some(Self::circle(Position::Geo { lat, lon }, max + buffer));
        }

        let planar: Vec<(f64, f64)> = positions
            .iter()
            .filter_map(|p| match p {
                Position::Planar { x, y } => Some((*x, *y)),
                _ => None,
            })
            .collect();
        if planar.is_empty() {
            return None;
        }
        let n = planar.len() as f64;
        let x = planar.iter().map(|p| p.0).sum::<f64>() / n;
        let y = planar.iter().map(|p| p.1).sum::<f64>() / n;
        let max = planar
            .iter()
            .map(|(a, b)| ((a - x).powi(2) + (b - y).powi(2)).sqrt())
            .fold(0.0, f64::max);
        Some(Self::circle(Position::Planar { x, y }, max + buffer))
    }
}

/// Point-in-time structure of a connection graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySummary {
    pub health: f64,
    pub online_nodes: usize,
    pub total_nodes: usize,
    pub links: usize,
    pub diameter: u32,
    pub clustering: f64,
    pub edge_density: f64,
    pub average_path_length: f64,
    pub components: usize,
}

impl TopologySummary {
    pub fn compute(nodes: &[Node], graph: &ConnectionGraph, config: &TopologyConfig) -> Self {
        Self {
            health: compute_health(nodes, config),
            online_nodes: graph.node_count(),
            total_nodes: nodes.len(),
            links: graph.edge_count(),
            diameter: graph.diameter(),
            clustering: graph.clustering_coefficient(),
            edge_density: graph.edge_density(),
            average_path_length: graph.average_path_length(),
            components: graph.components().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeRole, OnlineState};

    fn linked(id: &str, peers: &[&str]) -> Node {
        let mut n = Node::new(id, NodeRole::Relay);
        n.connections = peers.iter().map(|p| p.to_string()).collect();
        n
    }

    #[test]
    fn test_perfect_health() {
        let nodes = vec![linked("a", &["b"]), linked("b", &["a"])];
        let h = compute_health(&nodes, &TopologyConfig::default());
        assert!((h - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_health_weights_each_term() {
        let nodes = vec![
            linked("a", &[]).with_battery(40.0).with_signal(70.0),
            linked("b", &[]).with_battery(80.0).with_signal(50.0),
        ];
        // battery 60, signal 60, connectivity 0
        let h = compute_health(&nodes, &TopologyConfig::default());
        assert!((h - 40.0).abs() < 1e-9, "got {}", h);
    }

    #[test]
    fn test_offline_nodes_do_not_count() {
        let mut down = linked("c", &["a"]).with_battery(0.0);
        down.online = OnlineState::Offline;
        let nodes = vec![linked("a", &["b"]), linked("b", &["a"]), down];
        let h = compute_health(&nodes, &TopologyConfig::default());
        assert!((h - 100.0).abs() < 1e-9);
        assert_eq!(compute_health(&[], &TopologyConfig::default()), 0.0);
    }

    #[test]
    fn test_planar_coverage() {
        let cov = Coverage::from_positions(
            &[
                Position::Planar { x: 0.0, y: 0.0 },
                Position::Planar { x: 10.0, y: 0.0 },
            ],
            1.0,
        )
        .unwrap();
        assert_eq!(cov.center, Position::Planar { x: 5.0, y: 0.0 });
        assert_eq!(cov.radius, 6.0);
        assert!((cov.area - std::f64::consts::PI * 36.0).abs() < 1e-9);
    }

    #[test]
    fn test_geo_coverage_includes_buffer() {
        let cov = Coverage::from_positions(&[Position::Geo { lat: 10.0, lon: 10.0 }], 500.0).unwrap();
        assert_eq!(cov.radius, 500.0);
        assert!(Coverage::from_positions(&[], 500.0).is_none());
    }
}
