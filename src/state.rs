use std::sync::Arc;

use tracing::info;

use crate::config::{Config, DispatchConfig, RouteRecalcConfig};
use crate::distance::matrix::DistanceMatrixClient;
use crate::distance::{DistanceError, DistanceProvider, HaversineEstimator};
use crate::engine::assignment::{AssignmentService, Repositories};
use crate::engine::delivery::DeliveryService;
use crate::engine::location::LocationService;
use crate::engine::route::RouteRecalculationService;
use crate::notify::hub::WsHub;
use crate::notify::{LogPushNotifier, Notifier};
use crate::observability::metrics::Metrics;
use crate::repository::memory::{
    MemoryAssignmentRepository, MemoryLocationRepository, MemoryOrderRepository,
};

pub struct AppState {
    pub orders: Arc<MemoryOrderRepository>,
    pub assignments: Arc<MemoryAssignmentRepository>,
    pub drivers: Arc<MemoryLocationRepository>,
    pub hub: Arc<WsHub>,
    pub dispatcher: Arc<AssignmentService>,
    pub locations: LocationService,
    pub deliveries: DeliveryService,
    pub routes: Arc<RouteRecalculationService>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        dispatch: DispatchConfig,
        route: RouteRecalcConfig,
        distance: Arc<dyn DistanceProvider>,
        event_buffer_size: usize,
    ) -> Self {
        let orders = Arc::new(MemoryOrderRepository::new());
        let assignments = Arc::new(MemoryAssignmentRepository::new());
        let drivers = Arc::new(MemoryLocationRepository::new(orders.clone()));
        let hub = Arc::new(WsHub::new(event_buffer_size));
        let notifier = Notifier::new(hub.clone(), Arc::new(LogPushNotifier));
        let metrics = Metrics::new();

        let repos = Repositories {
            orders: orders.clone(),
            assignments: assignments.clone(),
            locations: drivers.clone(),
        };
        let routes = Arc::new(RouteRecalculationService::new(distance.clone(), route));

        let dispatcher = Arc::new(AssignmentService::new(
            repos,
            distance,
            notifier.clone(),
            metrics.clone(),
            dispatch,
        ));
        let locations = LocationService::new(
            drivers.clone(),
            orders.clone(),
            routes.clone(),
            notifier.clone(),
            metrics.clone(),
        );
        let deliveries =
            DeliveryService::new(orders.clone(), assignments.clone(), routes.clone(), notifier);

        Self {
            orders,
            assignments,
            drivers,
            hub,
            dispatcher,
            locations,
            deliveries,
            routes,
            metrics,
        }
    }

    /// Uses the distance-matrix API when a key is configured, straight-line
    /// estimates otherwise.
    pub fn from_config(config: &Config) -> Result<Self, DistanceError> {
        let distance: Arc<dyn DistanceProvider> = match &config.distance.api_key {
            Some(key) => {
                info!(api_url = %config.distance.api_url, "using distance matrix provider");
                Arc::new(DistanceMatrixClient::new(
                    config.distance.api_url.clone(),
                    key.clone(),
                    config.distance.max_origins_per_request,
                    config.distance.request_timeout,
                )?)
            }
            None => {
                info!("no DISTANCE_API_KEY set, using haversine estimates");
                Arc::new(HaversineEstimator)
            }
        };

        Ok(Self::new(
            config.dispatch.clone(),
            config.route.clone(),
            distance,
            config.event_buffer_size,
        ))
    }
}
