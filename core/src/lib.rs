// MeshAid Core: Mesh Routing & Emergency Propagation
//
// "Does this get a message from one survivor to another when every tower
//  is down?"
//
// If the answer is no, it doesn't belong in the core.

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod engine;
pub mod events;
pub mod message;
pub mod node;
pub mod platform;
pub mod routing;
pub mod scheduler;
pub mod simulation;
pub mod store;
pub mod topology;

use thiserror::Error;

pub use broadcast::{
    BroadcastOptions, BroadcastStatus, BroadcastType, EmergencyBroadcast,
    EmergencyBroadcastDistributor, IngestOutcome, Severity, TargetArea,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MeshConfig;
pub use engine::{InboundOutcome, MaintenanceReport, MeshEngine, Platform};
pub use events::{EventBus, MeshEvent};
pub use message::{DeliveryStatus, MeshMessage, MessageKind, MessageRouter, Priority, RouteOutcome};
pub use node::{Node, NodeId, NodeRegistry, NodeRole};
pub use routing::{Algorithm, Route, RouteConstraints, RouteDiscoveryEngine, RouteTable};
pub use scheduler::{MaintenanceScheduler, MaintenanceTask};
pub use simulation::{NetworkSimulator, SimulationConfig, SimulationMetrics, SimulationReport};
pub use store::{MemoryStorage, SledStorage, SnapshotStore, StorageBackend};
pub use topology::{ConnectionGraph, TopologyManager, TopologyShape};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// Unknown node, route, network or broadcast.
    #[error("Not found: {0}")]
    NotFound(String),
    /// Discovery or delivery exceeded its bound.
    #[error("Timed out: {0}")]
    Timeout(String),
    /// Malformed, stale, future-dated or ttl-exhausted input.
    #[error("Invalid: {0}")]
    Invalid(String),
    /// Caller is not allowed to do this (e.g. cancel someone else's broadcast).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// Hop or ttl budget used up without reaching the destination.
    #[error("Exhausted: {0}")]
    Exhausted(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A programming invariant was violated; fatal to the operation only.
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

impl MeshError {
    /// Whether the caller can branch on this and carry on.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, MeshError::Invariant(_))
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;

// ============================================================================
// LOGGING
// ============================================================================

/// Install a `RUST_LOG`-driven fmt subscriber, `warn` by default.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();
}
