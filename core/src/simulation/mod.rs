//! Discrete-tick network simulation
//!
//! - [`scenario`]: named parameter sets, including the fault-free baseline
//! - [`NetworkSimulator`]: synthetic population driving the routing stack
//! - [`SimulationMetrics`]: delivery, latency, reliability and efficiency figures
//! - [`comparison`]: identical runs per algorithm, ranked by overall score

pub mod comparison;
pub mod harness;
pub mod metrics;
pub mod scenario;

pub use comparison::{
    algorithm_label, compare_algorithms, score, AlgorithmProfile, AlgorithmScore,
    ComparisonReport,
};
pub use harness::{
    NetworkSimulator, SimulationEvent, SimulationEventKind, SimulationReport, TICK_MS,
};
pub use metrics::SimulationMetrics;
pub use scenario::{
    builtin_scenarios, find_scenario, static_baseline, PriorityMix, SimulationConfig,
    SimulationTuning,
};
