//! Emergency broadcasts: severity-scoped alerts flooded across the mesh,
//! acknowledged by receivers and expired on a timer.

pub mod distributor;
pub mod types;

pub use distributor::{
    AckOutcome, BroadcastChannel, BroadcastMaintenance, BroadcastStatistics, DetachedChannel,
    EmergencyBroadcastDistributor, IngestOutcome,
};
pub use types::{
    broadcast_priority, BroadcastOptions, BroadcastSender, BroadcastStatus, BroadcastType,
    EmergencyBroadcast, Severity, TargetArea,
};
