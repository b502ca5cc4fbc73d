//! Engine configuration.
//!
//! Every heuristic constant the engine relies on lives here as a named,
//! serde-overridable field. Defaults reproduce the values the field-tested
//! deployments were tuned with; none of them has a derivation beyond that.

use crate::routing::Algorithm;
use serde::{Deserialize, Serialize};

// ============================================================================
// ROUTING
// ============================================================================

/// Route table and discovery timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Algorithm used when the caller does not name one.
    pub algorithm: Algorithm,
    pub update_interval_ms: u64,
    pub max_hops: u32,
    /// Age after which a route is marked inactive.
    pub route_timeout_ms: u64,
    /// Maximum number of destinations held in the table.
    pub route_cache_size: usize,
    pub emergency_update_interval_ms: u64,
    pub emergency_max_hops: u32,
    pub emergency_route_timeout_ms: u64,
    /// Upper bound on a single timed discovery.
    pub discovery_timeout_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Hybrid,
            update_interval_ms: 60_000,
            max_hops: 10,
            route_timeout_ms: 300_000,
            route_cache_size: 100,
            emergency_update_interval_ms: 30_000,
            emergency_max_hops: 15,
            emergency_route_timeout_ms: 600_000,
            discovery_timeout_ms: 10_000,
        }
    }
}

impl RoutingConfig {
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn with_route_timeout_ms(mut self, timeout: u64) -> Self {
        self.route_timeout_ms = timeout;
        self
    }
}

/// Cost model for one discovery algorithm.
///
/// `metric = base + per_hop·h + signal_weight·(100 − destination signal)`,
/// `reliability = base_reliability − reliability_per_hop·h`,
/// `bandwidth = base_bandwidth − bandwidth_per_hop·h`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmCost {
    pub base_metric: f64,
    pub metric_per_hop: f64,
    pub signal_weight: f64,
    pub base_reliability: f64,
    pub reliability_per_hop: f64,
    pub base_bandwidth: f64,
    pub bandwidth_per_hop: f64,
}

impl AlgorithmCost {
    pub fn metric(&self, hops: u32, destination_signal: f64) -> f64 {
        self.base_metric
            + self.metric_per_hop * hops as f64
            + self.signal_weight * (100.0 - destination_signal.clamp(0.0, 100.0))
    }

    pub fn reliability(&self, hops: u32) -> f64 {
        (self.base_reliability - self.reliability_per_hop * hops as f64).clamp(0.0, 100.0)
    }

    pub fn bandwidth(&self, hops: u32) -> f64 {
        (self.base_bandwidth - self.bandwidth_per_hop * hops as f64).max(0.0)
    }
}

/// Per-algorithm cost models.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryCosts {
    pub reactive: AlgorithmCost,
    pub proactive: AlgorithmCost,
    pub source_route: AlgorithmCost,
    pub geographic: AlgorithmCost,
}

impl Default for DiscoveryCosts {
    fn default() -> Self {
        Self {
            reactive: AlgorithmCost {
                base_metric: 50.0,
                metric_per_hop: 10.0,
                signal_weight: 0.5,
                base_reliability: 90.0,
                reliability_per_hop: 5.0,
                base_bandwidth: 1000.0,
                bandwidth_per_hop: 100.0,
            },
            proactive: AlgorithmCost {
                base_metric: 0.0,
                metric_per_hop: 20.0,
                signal_weight: 0.0,
                base_reliability: 85.0,
                reliability_per_hop: 3.0,
                base_bandwidth: 900.0,
                bandwidth_per_hop: 80.0,
            },
            source_route: AlgorithmCost {
                base_metric: 0.0,
                metric_per_hop: 15.0,
                signal_weight: 0.0,
                base_reliability: 88.0,
                reliability_per_hop: 4.0,
                base_bandwidth: 950.0,
                bandwidth_per_hop: 90.0,
            },
            geographic: AlgorithmCost {
                base_metric: 0.0,
                metric_per_hop: 10.0,
                signal_weight: 0.0,
                base_reliability: 85.0,
                reliability_per_hop: 2.0,
                base_bandwidth: 1000.0,
                bandwidth_per_hop: 70.0,
            },
        }
    }
}

// ============================================================================
// TOPOLOGY
// ============================================================================

/// Health weighting, coverage and shape-selection knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub battery_weight: f64,
    pub signal_weight: f64,
    pub connectivity_weight: f64,
    /// Health below this triggers healing.
    pub low_health_threshold: f64,
    pub coverage_buffer_m: f64,
    pub initial_radius_m: f64,
    /// A candidate shape must beat the current one by this many points.
    pub shape_switch_margin: f64,
    /// Radio degree cap assumed when modelling mesh shapes.
    pub max_degree: usize,
    /// Link range used when proposing healing links, metres.
    pub link_range_m: f64,
    /// Per-hop latency assumed for the performance snapshot.
    pub hop_latency_ms: f64,
    pub health_check_interval_ms: u64,
    pub optimize_interval_ms: u64,
    /// Remote nodes silent for longer than this are pruned.
    pub node_stale_after_ms: u64,
    pub shape_model: ShapeModel,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            battery_weight: 1.0 / 3.0,
            signal_weight: 1.0 / 3.0,
            connectivity_weight: 1.0 / 3.0,
            low_health_threshold: 50.0,
            coverage_buffer_m: 500.0,
            initial_radius_m: 1_000.0,
            shape_switch_margin: 5.0,
            max_degree: 6,
            link_range_m: 200.0,
            hop_latency_ms: 50.0,
            health_check_interval_ms: 60_000,
            optimize_interval_ms: 300_000,
            node_stale_after_ms: 180_000,
            shape_model: ShapeModel::default(),
        }
    }
}

/// Weights of the expected-efficiency model used to rank topology shapes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeModel {
    /// Children per parent assumed for tree shapes.
    pub tree_branching: f64,
    pub path_weight: f64,
    pub load_weight: f64,
    pub redundancy_weight: f64,
    /// Extra redundancy weight at zero mean signal, scaled linearly.
    pub weak_signal_redundancy_weight: f64,
    pub emergency_redundancy_bonus: f64,
    /// Points lost per maintained link at an empty battery.
    pub energy_weight: f64,
}

impl Default for ShapeModel {
    fn default() -> Self {
        Self {
            tree_branching: 3.0,
            path_weight: 0.4,
            load_weight: 0.3,
            redundancy_weight: 0.3,
            weak_signal_redundancy_weight: 0.2,
            emergency_redundancy_bonus: 0.2,
            energy_weight: 10.0,
        }
    }
}

// ============================================================================
// MESSAGES & BROADCASTS
// ============================================================================

/// Forwarding defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub default_ttl: u32,
    pub max_retries: u32,
    /// Message ids remembered for inbound dedup.
    pub dedup_capacity: usize,
    pub heartbeat_interval_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_ttl: 10,
            max_retries: 3,
            dedup_capacity: 1024,
            heartbeat_interval_ms: 10_000,
        }
    }
}

/// Emergency broadcast ingest windows and maintenance timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub history_capacity: usize,
    /// Oldest acceptable broadcast timestamp relative to now.
    pub max_past_skew_ms: u64,
    /// Furthest-future acceptable broadcast timestamp relative to now.
    pub max_future_skew_ms: u64,
    pub sweep_interval_ms: u64,
    pub retry_interval_ms: u64,
    /// Hops a broadcast frame may travel from its sender.
    pub mesh_ttl: u32,
    /// Hops an acknowledgement may travel back towards the sender.
    pub ack_ttl: u32,
    /// Acknowledgements needed to call a broadcast complete; `None` leaves it partial.
    pub complete_ack_threshold: Option<u32>,
    /// Broadcast ids remembered for dedup.
    pub seen_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            history_capacity: 100,
            max_past_skew_ms: 3_600_000,
            max_future_skew_ms: 60_000,
            sweep_interval_ms: 60_000,
            retry_interval_ms: 30_000,
            mesh_ttl: 10,
            ack_ttl: 5,
            complete_ack_threshold: None,
            seen_capacity: 4096,
        }
    }
}

// ============================================================================
// TOP LEVEL
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    pub routing: RoutingConfig,
    pub costs: DiscoveryCosts,
    pub topology: TopologyConfig,
    pub router: RouterConfig,
    pub broadcast: BroadcastConfig,
}

impl MeshConfig {
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| crate::MeshError::Serialization(e.to_string()))
    }

    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| crate::MeshError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reactive_cost_model() {
        let costs = DiscoveryCosts::default();
        assert_eq!(costs.reactive.metric(4, 100.0), 90.0);
        assert_eq!(costs.reactive.metric(1, 80.0), 70.0);
        assert_eq!(costs.reactive.reliability(4), 70.0);
        assert_eq!(costs.reactive.bandwidth(4), 600.0);
    }

    #[test]
    fn test_cost_model_clamps() {
        let costs = DiscoveryCosts::default();
        assert_eq!(costs.reactive.reliability(40), 0.0);
        assert_eq!(costs.reactive.bandwidth(40), 0.0);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = MeshConfig::from_json(r#"{"routing": {"max_hops": 4}}"#).unwrap();
        assert_eq!(config.routing.max_hops, 4);
        assert_eq!(config.routing.route_timeout_ms, 300_000);
        assert_eq!(config.broadcast.history_capacity, 100);
    }

    #[test]
    fn test_shape_model_overrides_from_json() {
        let config =
            MeshConfig::from_json(r#"{"topology": {"shape_model": {"energy_weight": 0.0}}}"#).unwrap();
        assert_eq!(config.topology.shape_model.energy_weight, 0.0);
        assert_eq!(config.topology.shape_model.tree_branching, 3.0);
        assert_eq!(config.topology.low_health_threshold, 50.0);
    }

    #[test]
    fn test_json_roundtrip_preserves_overrides() {
        let mut config = MeshConfig::default();
        config.routing = config.routing.with_algorithm(Algorithm::Reactive);
        config.broadcast.complete_ack_threshold = Some(3);
        let back = MeshConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
