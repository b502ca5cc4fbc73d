//! Multi-algorithm mesh routing
//!
//! - [`algorithms`]: reactive, proactive, source-route, geographic and hybrid discovery
//! - [`ProactiveTable`]: Floyd–Warshall next hops, recomputed per topology version
//! - [`RouteDiscoveryEngine`]: runs algorithms as tracked, optionally timed sessions
//! - [`RouteTable`]: per-destination candidates, merge-in-place, aging, emergency mode
//!
//! Data flows one way: a graph snapshot goes into discovery, discovered routes
//! are merged into the table, and the message router reads from the table.

pub mod algorithms;
pub mod discovery;
pub mod proactive;
pub mod route;
pub mod table;

pub use algorithms::{Algorithm, DiscoveryRequest};
pub use discovery::{
    DiscoverySession, DiscoveryState, DiscoveryStats, GraphDiscovery, RouteDiscoveryEngine,
};
pub use proactive::ProactiveTable;
pub use route::{Route, RouteConstraints};
pub use table::{RouteDiscovery, RouteMaintenance, RouteTable, RouteTableEntry, RoutingMetrics};
