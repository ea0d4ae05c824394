use std::sync::Arc;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::engine::route::{RouteRecalculationService, RouteUpdate};
use crate::error::DispatchError;
use crate::models::driver::GeoPoint;
use crate::notify::{Notifier, RealtimeEvent};
use crate::observability::metrics::Metrics;
use crate::repository::{LocationRepository, OrderRepository};

#[derive(Debug, Clone, Serialize)]
pub struct LocationUpdate {
    pub driver_id: Uuid,
    pub location: GeoPoint,
    pub active_order_id: Option<Uuid>,
    pub route: Option<RouteUpdate>,
}

pub struct LocationService {
    locations: Arc<dyn LocationRepository>,
    orders: Arc<dyn OrderRepository>,
    routes: Arc<RouteRecalculationService>,
    notifier: Notifier,
    metrics: Metrics,
}

impl LocationService {
    pub fn new(
        locations: Arc<dyn LocationRepository>,
        orders: Arc<dyn OrderRepository>,
        routes: Arc<RouteRecalculationService>,
        notifier: Notifier,
        metrics: Metrics,
    ) -> Self {
        Self {
            locations,
            orders,
            routes,
            notifier,
            metrics,
        }
    }

    /// Stores the driver's position and, if they are working an order,
    /// refreshes its ETA. Only the position write can fail the call.
    pub async fn update_location(
        &self,
        driver_id: Uuid,
        location: GeoPoint,
    ) -> Result<LocationUpdate, DispatchError> {
        self.locations.update_location(driver_id, location).await?;

        let mut outcome = LocationUpdate {
            driver_id,
            location,
            active_order_id: None,
            route: None,
        };

        let order = match self.orders.find_active_order_by_driver_id(driver_id).await {
            Ok(Some(order)) => order,
            Ok(None) => return Ok(outcome),
            Err(err) => {
                warn!(driver_id = %driver_id, error = %err, "active order lookup failed");
                return Ok(outcome);
            }
        };
        outcome.active_order_id = Some(order.id);

        let Some(destination) = order.current_destination() else {
            return Ok(outcome);
        };

        let update = match self
            .routes
            .recalculate_route(driver_id, location, destination)
            .await
        {
            Ok(update) => update,
            Err(err) => {
                self.metrics.record_recalculation("error");
                warn!(driver_id = %driver_id, order_id = %order.id, error = %err, "route recalculation failed");
                return Ok(outcome);
            }
        };

        let result = match (update.recalculated, update.should_update) {
            (false, _) => "throttled",
            (true, false) => "unchanged",
            (true, true) => "updated",
        };
        self.metrics.record_recalculation(result);

        if update.should_update {
            match self
                .orders
                .update_route_info(order.id, update.distance_km, update.eta_minutes)
                .await
            {
                Ok(()) => self.notifier.broadcast_order(
                    order.id,
                    &RealtimeEvent::EtaUpdated {
                        order_id: order.id,
                        driver_id,
                        distance_km: update.distance_km,
                        eta_minutes: update.eta_minutes,
                    },
                ),
                Err(err) => {
                    warn!(order_id = %order.id, error = %err, "failed to store route info")
                }
            }
        }

        outcome.route = Some(update);
        Ok(outcome)
    }
}
