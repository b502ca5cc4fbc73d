// Topology shape model.
//
// Each candidate shape is scored by an expected-efficiency model built from
// the network's size, mean battery and mean signal: short paths, redundant
// links and low hub load score well, link upkeep costs energy.

use crate::config::ShapeModel;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopologyShape {
    Star,
    Mesh,
    Tree,
    Hybrid,
}

impl TopologyShape {
    pub const ALL: [TopologyShape; 4] = [
        TopologyShape::Star,
        TopologyShape::Mesh,
        TopologyShape::Tree,
        TopologyShape::Hybrid,
    ];
}

impl fmt::Display for TopologyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TopologyShape::Star => "star",
            TopologyShape::Mesh => "mesh",
            TopologyShape::Tree => "tree",
            TopologyShape::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// What the shape model needs to know about a network.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeInputs {
    pub nodes: usize,
    pub mean_battery: f64,
    pub mean_signal: f64,
    pub emergency: bool,
    /// Radio degree cap.
    pub max_degree: usize,
    pub model: ShapeModel,
}

/// Structural estimates for one shape at a given size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeEstimate {
    pub average_path: f64,
    /// 0 = single path everywhere, 1 = many disjoint paths.
    pub redundancy: f64,
    /// Share of traffic crossing the busiest node.
    pub hub_load: f64,
    /// Links each node has to keep alive.
    pub links_per_node: f64,
}

pub fn estimate(
    shape: TopologyShape,
    nodes: usize,
    max_degree: usize,
    model: &ShapeModel,
) -> ShapeEstimate {
    let n = nodes.max(1) as f64;
    let k = max_degree.max(2) as f64;
    let branching = model.tree_branching.max(2.0);
    if nodes <= 2 {
        return ShapeEstimate {
            average_path: 1.0,
            redundancy: 0.0,
            hub_load: 1.0,
            links_per_node: 1.0,
        };
    }
    match shape {
        TopologyShape::Star => ShapeEstimate {
            average_path: 2.0 * (n - 1.0) / n,
            redundancy: 0.0,
            hub_load: 1.0,
            links_per_node: 2.0 * (n - 1.0) / n,
        },
        TopologyShape::Tree => ShapeEstimate {
            average_path: (2.0 * n.ln() / branching.ln() - 1.0).max(1.0),
            redundancy: 0.0,
            hub_load: 1.0 / branching,
            links_per_node: 2.0 * (n - 1.0) / n,
        },
        TopologyShape::Mesh => {
            let degree = (n - 1.0).min(k);
            let average_path = if n - 1.0 <= k { 1.0 } else { (n.ln() / k.ln()).max(1.0) };
            ShapeEstimate {
                average_path,
                redundancy: ((degree - 1.0) / 3.0).min(1.0),
                hub_load: 1.0 / degree,
                links_per_node: degree,
            }
        }
        TopologyShape::Hybrid => {
            let clusters = n.sqrt().ceil();
            let cluster_size = (n / clusters).ceil();
            ShapeEstimate {
                average_path: 1.0 + 2.0 * (1.0 - 1.0 / clusters),
                redundancy: 0.5,
                hub_load: 1.0 / clusters,
                links_per_node: ((cluster_size - 1.0).min(k) + 1.0).max(1.0),
            }
        }
    }
}

/// Expected efficiency in [0, 100].
pub fn expected_efficiency(shape: TopologyShape, inputs: &ShapeInputs) -> f64 {
    let model = &inputs.model;
    let est = estimate(shape, inputs.nodes, inputs.max_degree, model);
    let signal = inputs.mean_signal.clamp(0.0, 100.0) / 100.0;
    let battery = inputs.mean_battery.clamp(0.0, 100.0) / 100.0;

    let mut redundancy_weight =
        model.redundancy_weight + model.weak_signal_redundancy_weight * (1.0 - signal);
    if inputs.emergency {
        redundancy_weight += model.emergency_redundancy_bonus;
    }
    let structural = model.path_weight / est.average_path
        + redundancy_weight * est.redundancy
        + model.load_weight * (1.0 - est.hub_load);
    let energy_penalty = est.links_per_node * (1.0 - battery) * model.energy_weight;
    (structural * 100.0 - energy_penalty).clamp(0.0, 100.0)
}

/// Score every shape, best first. Ties keep the declaration order.
pub fn rank_shapes(inputs: &ShapeInputs) -> Vec<(TopologyShape, f64)> {
    let mut ranked: Vec<(TopologyShape, f64)> = TopologyShape::ALL
        .iter()
        .map(|s| (*s, expected_efficiency(*s, inputs)))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// The shape to switch to, if the best candidate beats `current` by more than `margin`.
pub fn select_shape(
    current: TopologyShape,
    inputs: &ShapeInputs,
    margin: f64,
) -> Option<TopologyShape> {
    let ranked = rank_shapes(inputs);
    let (best, best_score) = *ranked.first()?;
    if best == current {
        return None;
    }
    let current_score = expected_efficiency(current, inputs);
    (best_score > current_score + margin).then_some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(nodes: usize) -> ShapeInputs {
        ShapeInputs {
            nodes,
            mean_battery: 100.0,
            mean_signal: 100.0,
            emergency: false,
            max_degree: 6,
            model: ShapeModel::default(),
        }
    }

    #[test]
    fn test_small_healthy_network_prefers_mesh() {
        assert_eq!(rank_shapes(&inputs(4))[0].0, TopologyShape::Mesh);
    }

    #[test]
    fn test_emergency_raises_mesh_score() {
        let calm = inputs(20);
        let urgent = ShapeInputs {
            emergency: true,
            ..calm
        };
        assert!(
            expected_efficiency(TopologyShape::Mesh, &urgent)
                > expected_efficiency(TopologyShape::Mesh, &calm)
        );
        assert_eq!(
            expected_efficiency(TopologyShape::Star, &urgent),
            expected_efficiency(TopologyShape::Star, &calm)
        );
    }

    #[test]
    fn test_low_battery_penalises_dense_shapes() {
        let drained = ShapeInputs {
            mean_battery: 10.0,
            ..inputs(30)
        };
        assert!(
            expected_efficiency(TopologyShape::Mesh, &drained)
                < expected_efficiency(TopologyShape::Mesh, &inputs(30))
        );
    }

    #[test]
    fn test_energy_weight_is_tunable() {
        let free_links = ShapeModel {
            energy_weight: 0.0,
            ..ShapeModel::default()
        };
        let drained = ShapeInputs {
            mean_battery: 10.0,
            model: free_links,
            ..inputs(30)
        };
        let healthy = ShapeInputs {
            model: free_links,
            ..inputs(30)
        };
        assert_eq!(
            expected_efficiency(TopologyShape::Mesh, &drained),
            expected_efficiency(TopologyShape::Mesh, &healthy)
        );
    }

    #[test]
    fn test_wider_trees_have_shorter_paths() {
        let binary = ShapeModel {
            tree_branching: 2.0,
            ..ShapeModel::default()
        };
        let wide = ShapeModel {
            tree_branching: 8.0,
            ..ShapeModel::default()
        };
        let narrow = estimate(TopologyShape::Tree, 100, 6, &binary);
        let broad = estimate(TopologyShape::Tree, 100, 6, &wide);
        assert!(broad.average_path < narrow.average_path);
        assert!(broad.hub_load < narrow.hub_load);
    }

    #[test]
    fn test_margin_prevents_thrashing() {
        let i = inputs(4);
        let ranked = rank_shapes(&i);
        let (best, best_score) = ranked[0];
        let (runner_up, runner_score) = ranked[1];
        let gap = best_score - runner_score;
        assert_eq!(select_shape(runner_up, &i, gap + 1.0), None);
        assert_eq!(select_shape(runner_up, &i, (gap - 0.5).max(0.0)), Some(best));
        assert_eq!(select_shape(best, &i, 0.0), None);
    }

    #[test]
    fn test_scores_are_bounded() {
        for n in [1, 2, 3, 10, 100, 1000] {
            for shape in TopologyShape::ALL {
                let s = expected_efficiency(shape, &inputs(n));
                assert!((0.0..=100.0).contains(&s));
            }
        }
    }
}
