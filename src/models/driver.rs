use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A driver returned by the radius query, before any pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyDriver {
    pub driver_id: Uuid,
    pub name: String,
    pub location: GeoPoint,
}

/// A candidate priced for the current search round. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverWithDistance {
    pub driver_id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub distance_km: f64,
    pub eta_minutes: i32,
    /// Set when the figures come from the straight-line fallback.
    pub estimated: bool,
}
