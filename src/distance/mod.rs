pub mod matrix;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geo::haversine_km;
use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RouteEstimate {
    pub distance_km: f64,
    pub eta_minutes: i32,
}

#[derive(Debug, Error)]
pub enum DistanceError {
    #[error("distance request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("distance provider returned status {0}")]
    Provider(String),

    #[error("unexpected distance response: {0}")]
    InvalidResponse(String),
}

/// Driving distance/duration between points. Batch calls return one
/// estimate per origin, in input order, or fail as a whole.
#[async_trait]
pub trait DistanceProvider: Send + Sync {
    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<RouteEstimate, DistanceError>;

    async fn routes_from(
        &self,
        origins: &[GeoPoint],
        destination: GeoPoint,
    ) -> Result<Vec<RouteEstimate>, DistanceError>;
}

const FALLBACK_SPEED_KMH: f64 = 25.0;

/// Straight-line estimate used when the routing provider is unavailable.
///
/// The figures are coarse: distance ignores the road network entirely and
/// the ETA assumes a constant urban speed of 25 km/h. Good enough to rank
/// nearby drivers, not to quote to a customer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaversineEstimator;

impl HaversineEstimator {
    pub fn estimate(&self, origin: &GeoPoint, destination: &GeoPoint) -> RouteEstimate {
        let distance_km = haversine_km(origin, destination);
        let minutes = (distance_km / FALLBACK_SPEED_KMH * 60.0).ceil() as i32;

        RouteEstimate {
            distance_km,
            eta_minutes: minutes.max(1),
        }
    }
}

#[async_trait]
impl DistanceProvider for HaversineEstimator {
    async fn route(
        &self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> Result<RouteEstimate, DistanceError> {
        Ok(self.estimate(&origin, &destination))
    }

    async fn routes_from(
        &self,
        origins: &[GeoPoint],
        destination: GeoPoint,
    ) -> Result<Vec<RouteEstimate>, DistanceError> {
        Ok(origins
            .iter()
            .map(|origin| self.estimate(origin, &destination))
            .collect())
    }
}
