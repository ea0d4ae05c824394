use std::collections::HashSet;

use tracing::warn;
use uuid::Uuid;

use crate::distance::{DistanceError, DistanceProvider, HaversineEstimator, RouteEstimate};
use crate::models::driver::{DriverWithDistance, GeoPoint, NearbyDriver};

pub struct PricedCandidates {
    pub candidates: Vec<DriverWithDistance>,
    pub used_fallback: bool,
}

/// Prices every driver against the pickup point in one batch. If the
/// provider fails for any driver, the whole batch is re-priced with the
/// straight-line estimator so nobody is silently dropped.
pub async fn price_candidates(
    provider: &dyn DistanceProvider,
    fallback: &HaversineEstimator,
    drivers: Vec<NearbyDriver>,
    pickup: GeoPoint,
) -> PricedCandidates {
    let origins: Vec<GeoPoint> = drivers.iter().map(|driver| driver.location).collect();

    let priced = match provider.routes_from(&origins, pickup).await {
        Ok(estimates) if estimates.len() == drivers.len() => Ok(estimates),
        Ok(estimates) => Err(DistanceError::InvalidResponse(format!(
            "expected {} estimates, got {}",
            drivers.len(),
            estimates.len()
        ))),
        Err(err) => Err(err),
    };

    let (estimates, used_fallback) = match priced {
        Ok(estimates) => (estimates, false),
        Err(err) => {
            warn!(error = %err, drivers = drivers.len(), "distance provider failed; using haversine estimate");
            let estimates = origins
                .iter()
                .map(|origin| fallback.estimate(origin, &pickup))
                .collect();
            (estimates, true)
        }
    };

    let candidates = drivers
        .into_iter()
        .zip(estimates)
        .map(|(driver, estimate)| with_distance(driver, estimate, used_fallback))
        .collect();

    PricedCandidates {
        candidates,
        used_fallback,
    }
}

fn with_distance(driver: NearbyDriver, estimate: RouteEstimate, estimated: bool) -> DriverWithDistance {
    DriverWithDistance {
        driver_id: driver.driver_id,
        name: driver.name,
        location: driver.location,
        distance_km: estimate.distance_km,
        eta_minutes: estimate.eta_minutes,
        estimated,
    }
}

/// Closest first, minus excluded drivers, at most `cap` long.
pub fn rank_candidates(
    mut candidates: Vec<DriverWithDistance>,
    excluded: &HashSet<Uuid>,
    cap: usize,
) -> Vec<DriverWithDistance> {
    candidates.retain(|candidate| !excluded.contains(&candidate.driver_id));
    candidates.sort_by(|a, b| {
        a.distance_km
            .total_cmp(&b.distance_km)
            .then(a.eta_minutes.cmp(&b.eta_minutes))
    });
    candidates.truncate(cap);
    candidates
}
