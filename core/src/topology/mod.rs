//! Topology management
//!
//! - [`ConnectionGraph`]: immutable, deterministic view of live links
//! - health, coverage and structural statistics
//! - [`Network`] lifecycle and shape selection with hysteresis
//! - [`TopologyManager`]: the only component that mutates links

pub mod graph;
pub mod health;
pub mod manager;
pub mod network;
pub mod shape;

pub use graph::ConnectionGraph;
pub use health::{compute_health, Coverage, TopologySummary};
pub use manager::{HealthReport, TopologyManager};
pub use network::{Network, NetworkKind, NetworkPerformance, NetworkSecurity};
pub use shape::{expected_efficiency, rank_shapes, select_shape, ShapeInputs, TopologyShape};
