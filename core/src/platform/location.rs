// Location provider and great-circle distance

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
    /// Accuracy radius in metres.
    pub accuracy: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            accuracy: 0.0,
        }
    }

    pub fn distance_to(&self, other: &Location) -> f64 {
        haversine_distance(self.lat, self.lon, other.lat, other.lon)
    }
}

/// Source of this device's last known position.
pub trait LocationProvider: Send + Sync {
    fn current_location(&self) -> Option<Location>;

    fn distance(&self, a: &Location, b: &Location) -> f64 {
        a.distance_to(b)
    }
}

/// Great-circle distance in metres between two lat/lon pairs (degrees).
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}

/// Settable position, `None` until a fix arrives.
#[derive(Debug, Default)]
pub struct StaticLocation {
    location: RwLock<Option<Location>>,
}

impl StaticLocation {
    pub fn new(location: Option<Location>) -> Self {
        Self {
            location: RwLock::new(location),
        }
    }

    pub fn set(&self, location: Option<Location>) {
        *self.location.write() = location;
    }
}

impl LocationProvider for StaticLocation {
    fn current_location(&self) -> Option<Location> {
        *self.location.read()
    }
}
