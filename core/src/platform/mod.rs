//! Platform seams
//!
//! The engine never talks to radios, sensors or key stores directly. These
//! traits are what a host application implements:
//! - [`LocationProvider`]: last known position of this device
//! - [`IdentityProvider`]: local node id plus sign/verify
//! - [`Transport`]: direct one-hop sends and link management
//! - [`PeerDiscoverySource`]: whatever finds neighbours (mDNS, BLE, Wi-Fi Direct)
//!
//! Each comes with a small in-process implementation used by tests, the
//! simulator and the CLI.

pub mod discovery;
pub mod identity;
pub mod location;
pub mod transport;

pub use discovery::{InMemoryDiscovery, PeerDiscoverySource};
pub use identity::{Ed25519Identity, IdentityProvider};
pub use location::{haversine_distance, Location, LocationProvider, StaticLocation};
pub use transport::{InMemoryTransport, Transport};
