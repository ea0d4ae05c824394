use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::route::RouteRecalculationService;
use crate::error::DispatchError;
use crate::models::order::{Order, OrderStatus};
use crate::notify::{Notifier, RealtimeEvent};
use crate::repository::{AssignmentRepository, OrderRepository};

const CANCELLABLE: [OrderStatus; 4] = [
    OrderStatus::Pending,
    OrderStatus::SearchingDriver,
    OrderStatus::Assigned,
    OrderStatus::Accepted,
];

/// Order transitions after dispatch: pickup, transit, delivery and
/// customer cancellation.
pub struct DeliveryService {
    orders: Arc<dyn OrderRepository>,
    assignments: Arc<dyn AssignmentRepository>,
    routes: Arc<RouteRecalculationService>,
    notifier: Notifier,
}

impl DeliveryService {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        assignments: Arc<dyn AssignmentRepository>,
        routes: Arc<RouteRecalculationService>,
        notifier: Notifier,
    ) -> Self {
        Self {
            orders,
            assignments,
            routes,
            notifier,
        }
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, DispatchError> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or(DispatchError::OrderNotFound(order_id))
    }

    /// Cancels the order on behalf of the customer. A running search sees
    /// the cancellation at the start of its next round; any offer still
    /// out is expired so it can no longer be accepted.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order, DispatchError> {
        let order = self.load(order_id).await?;
        if !order.status.can_cancel()
            || !self
                .orders
                .update_status_if(order_id, &CANCELLABLE, OrderStatus::Cancelled)
                .await?
        {
            let current = self.load(order_id).await?;
            return Err(DispatchError::InvalidTransition {
                order_id,
                from: current.status,
                to: OrderStatus::Cancelled,
            });
        }

        if let Err(err) = self.assignments.expire_pending_by_order_id(order_id).await {
            warn!(order_id = %order_id, error = %err, "failed to expire offers of cancelled order");
        }

        let event = RealtimeEvent::OrderStatusChanged {
            order_id,
            status: OrderStatus::Cancelled,
        };
        if let Some(driver_id) = order.driver_id {
            self.routes.clear_cache(driver_id);
            self.notifier.send_to_user(driver_id, &event);
        }
        self.notifier.broadcast_order(order_id, &event);

        info!(order_id = %order_id, previous = %order.status, "order cancelled");
        self.load(order_id).await
    }

    pub async fn mark_picked_up(&self, order_id: Uuid, driver_id: Uuid) -> Result<Order, DispatchError> {
        self.advance(order_id, driver_id, &[OrderStatus::Accepted], OrderStatus::PickedUp)
            .await
    }

    pub async fn mark_in_transit(&self, order_id: Uuid, driver_id: Uuid) -> Result<Order, DispatchError> {
        self.advance(order_id, driver_id, &[OrderStatus::PickedUp], OrderStatus::InTransit)
            .await
    }

    /// Closes the order once the customer's code checks out.
    pub async fn complete_delivery(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
        code: u32,
    ) -> Result<Order, DispatchError> {
        let order = self.load(order_id).await?;
        if order.driver_id != Some(driver_id) {
            return Err(DispatchError::DriverMismatch(order_id));
        }
        if order.delivery_code != code {
            return Err(DispatchError::InvalidDeliveryCode(order_id));
        }

        let delivered = self
            .advance(
                order_id,
                driver_id,
                &[OrderStatus::PickedUp, OrderStatus::InTransit],
                OrderStatus::Delivered,
            )
            .await?;
        self.routes.clear_cache(driver_id);
        Ok(delivered)
    }

    async fn advance(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<Order, DispatchError> {
        let order = self.load(order_id).await?;
        if order.driver_id != Some(driver_id) {
            return Err(DispatchError::DriverMismatch(order_id));
        }

        if !from.contains(&order.status) || !self.orders.update_status_if(order_id, from, to).await? {
            let current = self.load(order_id).await?;
            return Err(DispatchError::InvalidTransition {
                order_id,
                from: current.status,
                to,
            });
        }

        info!(order_id = %order_id, driver_id = %driver_id, status = %to, "order status changed");
        self.notifier.broadcast_order(
            order_id,
            &RealtimeEvent::OrderStatusChanged { order_id, status: to },
        );

        self.load(order_id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::DeliveryService;
    use crate::config::RouteRecalcConfig;
    use crate::distance::HaversineEstimator;
    use crate::engine::route::RouteRecalculationService;
    use crate::error::DispatchError;
    use crate::models::assignment::{AssignmentStatus, OrderAssignment};
    use crate::models::driver::{DriverWithDistance, GeoPoint};
    use crate::models::order::{NewOrder, Order, OrderStatus};
    use crate::notify::hub::WsHub;
    use crate::notify::{LogPushNotifier, Notifier};
    use crate::repository::memory::{MemoryAssignmentRepository, MemoryOrderRepository};
    use crate::repository::{AssignmentRepository, OrderRepository};

    struct Fixture {
        service: DeliveryService,
        orders: Arc<MemoryOrderRepository>,
        assignments: Arc<MemoryAssignmentRepository>,
        routes: Arc<RouteRecalculationService>,
    }

    fn fixture() -> Fixture {
        let orders = Arc::new(MemoryOrderRepository::new());
        let assignments = Arc::new(MemoryAssignmentRepository::new());
        let routes = Arc::new(RouteRecalculationService::new(
            Arc::new(HaversineEstimator),
            RouteRecalcConfig::default(),
        ));
        let notifier = Notifier::new(Arc::new(WsHub::new(16)), Arc::new(LogPushNotifier));
        Fixture {
            service: DeliveryService::new(orders.clone(), assignments.clone(), routes.clone(), notifier),
            orders,
            assignments,
            routes,
        }
    }

    async fn accepted_order(fx: &Fixture, driver_id: Uuid) -> Order {
        let order = Order::new(NewOrder {
            merchant_id: Uuid::new_v4(),
            pickup: GeoPoint::new(19.4326, -99.1332),
            pickup_address: "pickup".to_string(),
            delivery: GeoPoint::new(19.44, -99.14),
            delivery_address: "delivery".to_string(),
            total_cents: 4_200,
        });
        let id = order.id;
        fx.orders.insert(order).await.unwrap();
        fx.orders.update_status(id, OrderStatus::SearchingDriver).await.unwrap();
        fx.orders.update_accepted(id, driver_id).await.unwrap();
        fx.orders.find_by_id(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn full_delivery_requires_matching_code() {
        let fx = fixture();
        let driver_id = Uuid::new_v4();
        let order = accepted_order(&fx, driver_id).await;

        fx.service.mark_picked_up(order.id, driver_id).await.unwrap();
        fx.service.mark_in_transit(order.id, driver_id).await.unwrap();

        let wrong_code = if order.delivery_code == 1000 { 1001 } else { 1000 };
        let result = fx.service.complete_delivery(order.id, driver_id, wrong_code).await;
        assert!(matches!(result, Err(DispatchError::InvalidDeliveryCode(_))));

        let delivered = fx
            .service
            .complete_delivery(order.id, driver_id, order.delivery_code)
            .await
            .unwrap();
        assert_eq!(delivered.status, OrderStatus::Delivered);
        assert!(delivered.delivered_at.is_some());
    }

    #[tokio::test]
    async fn other_driver_cannot_advance_order() {
        let fx = fixture();
        let order = accepted_order(&fx, Uuid::new_v4()).await;

        let result = fx.service.mark_picked_up(order.id, Uuid::new_v4()).await;
        assert!(matches!(result, Err(DispatchError::DriverMismatch(_))));
    }

    #[tokio::test]
    async fn cannot_skip_pickup() {
        let fx = fixture();
        let driver_id = Uuid::new_v4();
        let order = accepted_order(&fx, driver_id).await;

        let result = fx.service.mark_in_transit(order.id, driver_id).await;
        assert!(matches!(
            result,
            Err(DispatchError::InvalidTransition { from: OrderStatus::Accepted, .. })
        ));
    }

    #[tokio::test]
    async fn cancel_expires_open_offer_and_clears_route_cache() {
        let fx = fixture();
        let driver_id = Uuid::new_v4();
        let order = accepted_order(&fx, driver_id).await;
        let offer = OrderAssignment::offer(
            order.id,
            &DriverWithDistance {
                driver_id: Uuid::new_v4(),
                name: "late".to_string(),
                location: GeoPoint::new(19.43, -99.13),
                distance_km: 1.2,
                eta_minutes: 4,
                estimated: true,
            },
            1,
            2.0,
            std::time::Duration::from_secs(10),
        );
        fx.assignments.create(offer.clone()).await.unwrap();
        fx.routes
            .recalculate_route(driver_id, GeoPoint::new(19.43, -99.13), order.pickup)
            .await
            .unwrap();

        let cancelled = fx.service.cancel_order(order.id).await.unwrap();

        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        let offer = fx.assignments.find_by_id(offer.id).await.unwrap().unwrap();
        assert_eq!(offer.status, AssignmentStatus::Expired);
        assert_eq!(fx.routes.cached_drivers(), 0);
    }

    #[tokio::test]
    async fn picked_up_order_cannot_be_cancelled() {
        let fx = fixture();
        let driver_id = Uuid::new_v4();
        let order = accepted_order(&fx, driver_id).await;
        fx.service.mark_picked_up(order.id, driver_id).await.unwrap();

        let result = fx.service.cancel_order(order.id).await;
        assert!(matches!(
            result,
            Err(DispatchError::InvalidTransition { from: OrderStatus::PickedUp, .. })
        ));
    }
}
