// Simulation scenarios: named parameter sets for the harness.

use crate::routing::Algorithm;
use crate::{MeshError, Result};
use serde::{Deserialize, Serialize};

/// Share of generated messages per priority, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityMix {
    pub emergency: f64,
    pub high: f64,
    pub normal: f64,
    pub low: f64,
}

impl Default for PriorityMix {
    fn default() -> Self {
        Self {
            emergency: 10.0,
            high: 20.0,
            normal: 50.0,
            low: 20.0,
        }
    }
}

/// Per-tick chances and rates of the node model. Scenario-independent; the
/// defaults are the values the built-in scenarios were calibrated with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationTuning {
    /// Battery percent per tick before `battery_drain_factor`.
    pub coordinator_drain: f64,
    pub relay_drain: f64,
    pub bridge_drain: f64,
    pub endpoint_drain: f64,
    /// Battery percent per message handled, before `battery_drain_factor`.
    pub processing_drain: f64,
    /// Chance per tick that two in-range unlinked nodes find each other.
    pub link_discovery_chance: f64,
    /// Chance per node pair of an extra random link at start-up.
    pub extra_link_chance: f64,
    pub recovery_chance: f64,
    pub recharge_chance: f64,
    pub recharge_amount: f64,
    /// Battery level a recharging node must pass to come back online.
    pub recharge_online_level: f64,
    pub emergency_resolution_chance: f64,
    /// Route tables are aged every this many ticks.
    pub table_maintenance_ticks: u64,
}

impl Default for SimulationTuning {
    fn default() -> Self {
        Self {
            coordinator_drain: 0.02,
            relay_drain: 0.05,
            bridge_drain: 0.04,
            endpoint_drain: 0.03,
            processing_drain: 0.01,
            link_discovery_chance: 0.1,
            extra_link_chance: 0.1,
            recovery_chance: 0.1,
            recharge_chance: 0.05,
            recharge_amount: 10.0,
            recharge_online_level: 15.0,
            emergency_resolution_chance: 0.02,
            table_maintenance_ticks: 60,
        }
    }
}

/// Everything one simulation run depends on. Two runs with equal configs
/// produce equal metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub id: String,
    pub name: String,
    pub description: String,
    pub node_count: usize,
    /// Simulated ticks (one tick is one second).
    pub duration_ticks: u64,
    /// Messages generated per simulated minute.
    pub message_rate: f64,
    /// Per-node failure chance per tick, in percent.
    pub failure_rate: f64,
    /// Emergency activation chance per tick is a tenth of this.
    pub emergency_probability: f64,
    /// 0 keeps every node in place.
    pub mobility_factor: f64,
    /// Multiplier on every battery drain; 0 disables drain.
    pub battery_drain_factor: f64,
    /// Amplitude of per-tick signal fluctuation.
    pub signal_interference: f64,
    pub algorithm: Algorithm,
    pub seed: u64,
    pub message_ttl: u32,
    /// Messages a node handles per tick.
    pub max_messages_per_node: usize,
    pub priority_mix: PriorityMix,
    /// Publish `MetricsUpdated` every this many ticks.
    pub metrics_interval: u64,
    pub tuning: SimulationTuning,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            id: "normal_operation".to_string(),
            name: "Normal Operation".to_string(),
            description: "Standard mesh network operation with minimal disruptions".to_string(),
            node_count: 20,
            duration_ticks: 300,
            message_rate: 5.0,
            failure_rate: 0.05,
            emergency_probability: 0.01,
            mobility_factor: 0.2,
            battery_drain_factor: 0.5,
            signal_interference: 0.2,
            algorithm: Algorithm::Hybrid,
            seed: 42,
            message_ttl: 10,
            max_messages_per_node: 3,
            priority_mix: PriorityMix::default(),
            metrics_interval: 10,
            tuning: SimulationTuning::default(),
        }
    }
}

impl SimulationConfig {
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_duration(mut self, ticks: u64) -> Self {
        self.duration_ticks = ticks;
        self
    }

    pub fn with_node_count(mut self, nodes: usize) -> Self {
        self.node_count = nodes;
        self
    }

    pub fn with_tuning(mut self, tuning: SimulationTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_count < 2 {
            return Err(MeshError::Invalid(format!(
                "scenario {} needs at least 2 nodes, has {}",
                self.id, self.node_count
            )));
        }
        let rates = [
            self.message_rate,
            self.failure_rate,
            self.emergency_probability,
            self.mobility_factor,
            self.battery_drain_factor,
            self.signal_interference,
        ];
        if rates.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(MeshError::Invalid(format!(
                "scenario {} has a negative or non-finite rate",
                self.id
            )));
        }
        let t = &self.tuning;
        let chances = [
            t.link_discovery_chance,
            t.extra_link_chance,
            t.recovery_chance,
            t.recharge_chance,
            t.emergency_resolution_chance,
        ];
        if chances.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(MeshError::Invalid(format!(
                "scenario {} has a tuning chance outside [0, 1]",
                self.id
            )));
        }
        let drains = [
            t.coordinator_drain,
            t.relay_drain,
            t.bridge_drain,
            t.endpoint_drain,
            t.processing_drain,
            t.recharge_amount,
        ];
        if drains.iter().any(|d| !d.is_finite() || *d < 0.0) || t.table_maintenance_ticks == 0 {
            return Err(MeshError::Invalid(format!(
                "scenario {} has invalid tuning rates",
                self.id
            )));
        }
        if self.max_messages_per_node == 0 {
            return Err(MeshError::Invalid(
                "max_messages_per_node must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn scenario(
    id: &str,
    name: &str,
    description: &str,
    node_count: usize,
    message_rate: f64,
    failure_rate: f64,
    emergency_probability: f64,
    mobility_factor: f64,
    battery_drain_factor: f64,
    signal_interference: f64,
) -> SimulationConfig {
    SimulationConfig {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        node_count,
        message_rate,
        failure_rate,
        emergency_probability,
        mobility_factor,
        battery_drain_factor,
        signal_interference,
        ..SimulationConfig::default()
    }
}

/// The built-in scenarios, in presentation order.
pub fn builtin_scenarios() -> Vec<SimulationConfig> {
    vec![
        scenario(
            "normal_operation",
            "Normal Operation",
            "Standard mesh network operation with minimal disruptions",
            20, 5.0, 0.05, 0.01, 0.2, 0.5, 0.2,
        ),
        scenario(
            "emergency_scenario",
            "Emergency Response",
            "High-stress emergency situation with node failures and high message volume",
            30, 15.0, 0.2, 0.5, 0.4, 1.0, 0.6,
        ),
        scenario(
            "network_stress_test",
            "Network Stress Test",
            "Maximum load testing with high failure rates and interference",
            50, 30.0, 0.3, 0.2, 0.3, 1.5, 0.8,
        ),
        scenario(
            "battery_optimization",
            "Battery Optimization",
            "Long-running scenario focused on battery life optimization",
            25, 8.0, 0.1, 0.05, 0.1, 0.3, 0.3,
        ),
        scenario(
            "routing_algorithm_comparison",
            "Routing Algorithm Comparison",
            "Compare different routing algorithms under identical conditions",
            40, 20.0, 0.15, 0.1, 0.3, 0.7, 0.4,
        ),
        static_baseline(),
    ]
}

/// No failures, no movement, no drain, no interference, no emergencies.
pub fn static_baseline() -> SimulationConfig {
    scenario(
        "static_baseline",
        "Static Baseline",
        "Fixed, fault-free network used as the delivery acceptance baseline",
        20, 10.0, 0.0, 0.0, 0.0, 0.0, 0.0,
    )
}

/// Built-in scenario by id.
pub fn find_scenario(id: &str) -> Result<SimulationConfig> {
    builtin_scenarios()
        .into_iter()
        .find(|s| s.id == id)
        .ok_or_else(|| MeshError::NotFound(format!("scenario '{}'", id)))
}
