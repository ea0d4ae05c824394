use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::config::RouteRecalcConfig;
use crate::distance::{DistanceError, DistanceProvider, HaversineEstimator, RouteEstimate};
use crate::geo::haversine_meters;
use crate::models::driver::GeoPoint;

#[derive(Debug, Clone)]
struct RecalculationCache {
    last_recalculated: Instant,
    last_position: GeoPoint,
    destination: GeoPoint,
    last_estimate: RouteEstimate,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct RouteUpdate {
    pub distance_km: f64,
    pub eta_minutes: i32,
    /// True when the ETA moved enough to be worth persisting and broadcasting.
    pub should_update: bool,
    /// False when the cached figures were returned without calling the provider.
    pub recalculated: bool,
}

/// Per-driver throttle in front of the routing provider for live ETAs.
///
/// A driver is only re-routed once both the time and the distance
/// thresholds have been crossed since the last call, and the result is only
/// flagged for publication when the ETA changed by a meaningful amount.
/// The cache must be cleared when the driver's order ends.
pub struct RouteRecalculationService {
    provider: Arc<dyn DistanceProvider>,
    config: RouteRecalcConfig,
    cache: DashMap<Uuid, RecalculationCache>,
}

impl RouteRecalculationService {
    pub fn new(provider: Arc<dyn DistanceProvider>, config: RouteRecalcConfig) -> Self {
        Self {
            provider,
            config,
            cache: DashMap::new(),
        }
    }

    pub fn should_recalculate(&self, driver_id: Uuid, position: GeoPoint) -> bool {
        match self.cache.get(&driver_id) {
            None => true,
            Some(entry) => self.throttle_passed(&entry, position),
        }
    }

    fn throttle_passed(&self, cached: &RecalculationCache, position: GeoPoint) -> bool {
        let waited = cached.last_recalculated.elapsed() >= self.config.min_interval;
        let moved = haversine_meters(&cached.last_position, &position)
            >= self.config.min_distance_moved_meters;
        waited && moved
    }

    /// Decides under the cache entry's lock whether this call may reach the
    /// provider, and if so stamps the slot before awaiting. A concurrent
    /// ping for the same driver then sees the fresh stamp and is throttled.
    fn reserve(
        &self,
        driver_id: Uuid,
        current: GeoPoint,
        destination: GeoPoint,
    ) -> Result<Option<RecalculationCache>, RouteUpdate> {
        let reservation = |last_estimate: RouteEstimate| RecalculationCache {
            last_recalculated: Instant::now(),
            last_position: current,
            destination,
            last_estimate,
        };

        match self.cache.entry(driver_id) {
            Entry::Occupied(mut entry) => {
                let cached = entry.get().clone();
                if cached.destination == destination && !self.throttle_passed(&cached, current) {
                    return Err(RouteUpdate {
                        distance_km: cached.last_estimate.distance_km,
                        eta_minutes: cached.last_estimate.eta_minutes,
                        should_update: false,
                        recalculated: false,
                    });
                }
                entry.insert(reservation(cached.last_estimate));
                Ok(Some(cached))
            }
            Entry::Vacant(entry) => {
                // Straight-line figures stand in until the provider answers.
                entry.insert(reservation(HaversineEstimator.estimate(&current, &destination)));
                Ok(None)
            }
        }
    }

    pub async fn recalculate_route(
        &self,
        driver_id: Uuid,
        current: GeoPoint,
        destination: GeoPoint,
    ) -> Result<RouteUpdate, DistanceError> {
        let previous = match self.reserve(driver_id, current, destination) {
            Ok(previous) => previous,
            Err(throttled) => {
                debug!(driver_id = %driver_id, "route recalculation throttled");
                return Ok(throttled);
            }
        };

        let estimate = match self.provider.route(current, destination).await {
            Ok(estimate) => estimate,
            Err(err) => {
                // Release the reservation so the next ping retries. A cache
                // cleared meanwhile stays cleared.
                match previous {
                    Some(cached) => {
                        if let Some(mut entry) = self.cache.get_mut(&driver_id) {
                            *entry = cached;
                        }
                    }
                    None => {
                        self.cache.remove(&driver_id);
                    }
                }
                return Err(err);
            }
        };

        if let Some(mut entry) = self.cache.get_mut(&driver_id) {
            entry.last_estimate = estimate;
        }

        let should_update = match &previous {
            Some(cached) if cached.destination == destination => {
                (estimate.eta_minutes - cached.last_estimate.eta_minutes).abs()
                    >= self.config.min_eta_change_minutes
            }
            _ => true,
        };

        debug!(
            driver_id = %driver_id,
            eta_minutes = estimate.eta_minutes,
            should_update,
            "route recalculated"
        );

        Ok(RouteUpdate {
            distance_km: estimate.distance_km,
            eta_minutes: estimate.eta_minutes,
            should_update,
            recalculated: true,
        })
    }

    pub fn clear_cache(&self, driver_id: Uuid) {
        self.cache.remove(&driver_id);
    }

    pub fn cached_drivers(&self) -> usize {
        self.cache.len()
    }
}
