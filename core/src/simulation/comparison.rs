//! Side-by-side algorithm comparison.
//!
//! Each algorithm runs the same scenario with the same seed, so the node
//! population, failures and traffic are identical and only routing differs.
//! Measured delivery and hop counts are blended with each algorithm's
//! baseline profile into one overall score.

use super::harness::{NetworkSimulator, SimulationEventKind};
use super::metrics::SimulationMetrics;
use super::scenario::SimulationConfig;
use crate::config::MeshConfig;
use crate::routing::Algorithm;
use crate::{MeshError, Result};
use serde::{Deserialize, Serialize};

/// Static characteristics of an algorithm that a single run cannot measure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmProfile {
    pub control_overhead: f64,
    pub energy_efficiency: f64,
    pub route_stability: f64,
    pub adaptability: f64,
}

impl AlgorithmProfile {
    pub fn baseline(algorithm: Algorithm) -> Self {
        let (control_overhead, energy_efficiency, route_stability, adaptability) = match algorithm {
            Algorithm::Reactive => (60.0, 70.0, 75.0, 80.0),
            Algorithm::Proactive => (80.0, 60.0, 85.0, 70.0),
            Algorithm::SourceRoute => (65.0, 75.0, 70.0, 75.0),
            Algorithm::Geographic => (50.0, 85.0, 65.0, 90.0),
            Algorithm::Hybrid => (70.0, 80.0, 85.0, 95.0),
        };
        Self {
            control_overhead,
            energy_efficiency,
            route_stability,
            adaptability,
        }
    }
}

/// Display name of an algorithm.
pub fn algorithm_label(algorithm: Algorithm) -> &'static str {
    match algorithm {
        Algorithm::Reactive => "AODV (Ad-hoc On-demand Distance Vector)",
        Algorithm::Proactive => "OLSR (Optimized Link State Routing)",
        Algorithm::SourceRoute => "DSR (Dynamic Source Routing)",
        Algorithm::Geographic => "GPSR (Greedy Perimeter Stateless Routing)",
        Algorithm::Hybrid => "Hybrid Routing",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmScore {
    pub algorithm: Algorithm,
    pub name: String,
    /// Modelled per-message latency, ms.
    pub average_latency: f64,
    pub packet_delivery_ratio: f64,
    pub control_overhead: f64,
    pub energy_efficiency: f64,
    pub route_stability: f64,
    pub adaptability: f64,
    pub overall_score: f64,
    pub metrics: SimulationMetrics,
}

/// Results of one comparison, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub scenario: String,
    pub seed: u64,
    pub ticks: u64,
    pub emergency_mode: bool,
    pub results: Vec<AlgorithmScore>,
}

impl ComparisonReport {
    pub fn best(&self) -> Option<&AlgorithmScore> {
        self.results.first()
    }

    pub fn score_for(&self, algorithm: Algorithm) -> Option<&AlgorithmScore> {
        self.results.iter().find(|r| r.algorithm == algorithm)
    }
}

/// Blend measured metrics with the algorithm's profile.
///
/// `overall = PDR·0.3 + (100 − latency/3)·0.2 + (100 − overhead)·0.1
///          + efficiency·0.15 + stability·0.15 + adaptability·0.1`
pub fn score(algorithm: Algorithm, metrics: &SimulationMetrics, emergency_mode: bool) -> AlgorithmScore {
    let profile = AlgorithmProfile::baseline(algorithm);
    let hops = metrics.average_hops;
    let latency = 100.0 + hops * 10.0;
    let delivery = metrics.delivery_rate;
    let overhead = profile.control_overhead;
    let efficiency = (profile.energy_efficiency - hops * 2.0).max(0.0);
    let stability = profile.route_stability;
    let adaptability = if emergency_mode {
        profile.adaptability + 10.0
    } else {
        profile.adaptability
    };

    let overall = delivery * 0.3
        + (100.0 - latency / 3.0) * 0.2
        + (100.0 - overhead) * 0.1
        + efficiency * 0.15
        + stability * 0.15
        + adaptability * 0.1;

    AlgorithmScore {
        algorithm,
        name: algorithm_label(algorithm).to_string(),
        average_latency: latency,
        packet_delivery_ratio: delivery,
        control_overhead: overhead,
        energy_efficiency: efficiency,
        route_stability: stability,
        adaptability,
        overall_score: overall,
        metrics: metrics.clone(),
    }
}

/// Run `config` once per algorithm and rank them by overall score.
pub fn compare_algorithms(
    config: &SimulationConfig,
    algorithms: &[Algorithm],
    mesh: &MeshConfig,
) -> Result<ComparisonReport> {
    if algorithms.is_empty() {
        return Err(MeshError::Invalid("no algorithms to compare".to_string()));
    }
    let mut runs = Vec::with_capacity(algorithms.len());
    for &algorithm in algorithms {
        let mut sim = NetworkSimulator::with_mesh_config(
            config.clone().with_algorithm(algorithm),
            mesh.clone(),
        )?;
        let report = sim.run();
        tracing::info!(
            "{} on '{}': delivery {:.1}%, {:.2} hops",
            algorithm,
            config.id,
            report.metrics.delivery_rate,
            report.metrics.average_hops
        );
        runs.push((algorithm, report));
    }

    // identical seeds give identical environments, so any run's log will do
    let emergency_mode = runs.iter().any(|(_, r)| {
        r.events
            .iter()
            .any(|e| e.kind == SimulationEventKind::EmergencyActivated)
    });
    let mut results: Vec<AlgorithmScore> = runs
        .iter()
        .map(|(algorithm, report)| score(*algorithm, &report.metrics, emergency_mode))
        .collect();
    results.sort_by(|a, b| {
        b.overall_score
            .partial_cmp(&a.overall_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.algorithm.cmp(&b.algorithm))
    });

    Ok(ComparisonReport {
        scenario: config.id.clone(),
        seed: config.seed,
        ticks: config.duration_ticks,
        emergency_mode,
        results,
    })
}
