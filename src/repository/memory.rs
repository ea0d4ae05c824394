use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::geo::haversine_km;
use crate::models::assignment::{AssignmentStatus, OrderAssignment};
use crate::models::driver::{GeoPoint, NearbyDriver};
use crate::models::order::{Order, OrderStatus};
use crate::repository::{
    AssignmentRepository, LocationRepository, OrderRepository, RepositoryError,
};

#[derive(Default)]
pub struct MemoryOrderRepository {
    orders: DashMap<Uuid, Order>,
}

impl MemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn has_active_order(&self, driver_id: Uuid) -> bool {
        self.orders
            .iter()
            .any(|entry| entry.driver_id == Some(driver_id) && entry.status.is_active())
    }
}

fn order_not_found(id: Uuid) -> RepositoryError {
    RepositoryError::NotFound { entity: "order", id }
}

#[async_trait]
impl OrderRepository for MemoryOrderRepository {
    async fn insert(&self, order: Order) -> Result<(), RepositoryError> {
        if self.orders.contains_key(&order.id) {
            return Err(RepositoryError::Duplicate(order.id));
        }
        self.orders.insert(order.id, order);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, RepositoryError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_status(&self, id: Uuid, status: OrderStatus) -> Result<(), RepositoryError> {
        let mut order = self.orders.get_mut(&id).ok_or_else(|| order_not_found(id))?;
        order.set_status(status, Utc::now());
        Ok(())
    }

    async fn update_status_if(
        &self,
        id: Uuid,
        expected: &[OrderStatus],
        status: OrderStatus,
    ) -> Result<bool, RepositoryError> {
        let mut order = self.orders.get_mut(&id).ok_or_else(|| order_not_found(id))?;
        if !expected.contains(&order.status) {
            return Ok(false);
        }
        order.set_status(status, Utc::now());
        Ok(true)
    }

    async fn assign_driver(&self, id: Uuid, driver_id: Uuid) -> Result<bool, RepositoryError> {
        let mut order = self.orders.get_mut(&id).ok_or_else(|| order_not_found(id))?;
        if !matches!(order.status, OrderStatus::SearchingDriver | OrderStatus::Assigned) {
            return Ok(false);
        }
        order.driver_id = Some(driver_id);
        order.set_status(OrderStatus::Assigned, Utc::now());
        Ok(true)
    }

    async fn unassign_driver(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let mut order = self.orders.get_mut(&id).ok_or_else(|| order_not_found(id))?;
        if order.status != OrderStatus::Assigned {
            return Ok(false);
        }
        order.driver_id = None;
        order.assigned_at = None;
        order.status = OrderStatus::SearchingDriver;
        Ok(true)
    }

    async fn update_accepted(&self, id: Uuid, driver_id: Uuid) -> Result<bool, RepositoryError> {
        let mut order = self.orders.get_mut(&id).ok_or_else(|| order_not_found(id))?;
        if !matches!(order.status, OrderStatus::SearchingDriver | OrderStatus::Assigned) {
            return Ok(false);
        }
        order.driver_id = Some(driver_id);
        order.set_status(OrderStatus::Accepted, Utc::now());
        Ok(true)
    }

    async fn update_route_info(
        &self,
        id: Uuid,
        distance_km: f64,
        eta_minutes: i32,
    ) -> Result<(), RepositoryError> {
        let mut order = self.orders.get_mut(&id).ok_or_else(|| order_not_found(id))?;
        order.distance_km = Some(distance_km);
        order.eta_minutes = Some(eta_minutes);
        Ok(())
    }

    async fn find_active_order_by_driver_id(
        &self,
        driver_id: Uuid,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .orders
            .iter()
            .filter(|entry| entry.driver_id == Some(driver_id) && entry.status.is_active())
            .max_by_key(|entry| entry.created_at)
            .map(|entry| entry.value().clone()))
    }
}

/// Assignment rows behind one table-wide lock so that cross-row rules (one
/// `accepted` per order, bulk expiry) are applied atomically.
#[derive(Default)]
pub struct MemoryAssignmentRepository {
    rows: RwLock<HashMap<Uuid, OrderAssignment>>,
}

impl MemoryAssignmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn transition(
        &self,
        id: Uuid,
        status: AssignmentStatus,
        reason: Option<String>,
    ) -> Result<bool, RepositoryError> {
        let mut rows = self.rows.write();

        let (order_id, current) = match rows.get(&id) {
            Some(row) => (row.order_id, row.status),
            None => return Err(RepositoryError::NotFound { entity: "assignment", id }),
        };
        if current != AssignmentStatus::Pending {
            return Ok(false);
        }

        if status == AssignmentStatus::Accepted
            && rows
                .values()
                .any(|row| row.order_id == order_id && row.status == AssignmentStatus::Accepted)
        {
            return Err(RepositoryError::Constraint(format!(
                "order {order_id} already has an accepted assignment"
            )));
        }

        if let Some(row) = rows.get_mut(&id) {
            row.status = status;
            row.responded_at = Some(Utc::now());
            if reason.is_some() {
                row.rejection_reason = reason;
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl AssignmentRepository for MemoryAssignmentRepository {
    async fn create(&self, assignment: OrderAssignment) -> Result<(), RepositoryError> {
        let mut rows = self.rows.write();
        if rows.contains_key(&assignment.id) {
            return Err(RepositoryError::Duplicate(assignment.id));
        }
        rows.insert(assignment.id, assignment);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderAssignment>, RepositoryError> {
        Ok(self.rows.read().get(&id).cloned())
    }

    async fn find_pending_by_order_and_driver(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
    ) -> Result<Option<OrderAssignment>, RepositoryError> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|row| {
                row.order_id == order_id
                    && row.driver_id == driver_id
                    && row.status == AssignmentStatus::Pending
            })
            .max_by_key(|row| row.attempt_number)
            .cloned())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AssignmentStatus,
    ) -> Result<bool, RepositoryError> {
        self.transition(id, status, None)
    }

    async fn update_status_with_reason(
        &self,
        id: Uuid,
        status: AssignmentStatus,
        reason: Option<String>,
    ) -> Result<bool, RepositoryError> {
        self.transition(id, status, reason)
    }

    async fn get_next_attempt_number(&self, order_id: Uuid) -> Result<i32, RepositoryError> {
        let last = self
            .rows
            .read()
            .values()
            .filter(|row| row.order_id == order_id)
            .map(|row| row.attempt_number)
            .max()
            .unwrap_or(0);
        Ok(last + 1)
    }

    async fn expire_pending_by_order_id(&self, order_id: Uuid) -> Result<usize, RepositoryError> {
        let now = Utc::now();
        let mut expired = 0;
        for row in self.rows.write().values_mut() {
            if row.order_id == order_id && row.status == AssignmentStatus::Pending {
                row.status = AssignmentStatus::Expired;
                row.responded_at = Some(now);
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn get_rejected_driver_ids_by_order_id(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<Uuid>, RepositoryError> {
        let mut drivers: Vec<Uuid> = self
            .rows
            .read()
            .values()
            .filter(|row| row.order_id == order_id && row.status.excludes_driver())
            .map(|row| row.driver_id)
            .collect();
        drivers.sort();
        drivers.dedup();
        Ok(drivers)
    }

    async fn find_pending_by_driver(
        &self,
        driver_id: Uuid,
    ) -> Result<Vec<OrderAssignment>, RepositoryError> {
        let mut pending: Vec<OrderAssignment> = self
            .rows
            .read()
            .values()
            .filter(|row| row.driver_id == driver_id && row.status == AssignmentStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|row| row.created_at);
        Ok(pending)
    }

    async fn find_by_order_id(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<OrderAssignment>, RepositoryError> {
        let mut history: Vec<OrderAssignment> = self
            .rows
            .read()
            .values()
            .filter(|row| row.order_id == order_id)
            .cloned()
            .collect();
        history.sort_by_key(|row| row.attempt_number);
        Ok(history)
    }

    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<OrderAssignment>, RepositoryError> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|row| row.status == AssignmentStatus::Pending && row.expires_at < cutoff)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverRecord {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub online: bool,
    pub updated_at: DateTime<Utc>,
}

/// Driver positions with a linear radius scan. A driver is available when
/// online and not tied to an active order.
pub struct MemoryLocationRepository {
    drivers: DashMap<Uuid, DriverRecord>,
    orders: Arc<MemoryOrderRepository>,
}

impl MemoryLocationRepository {
    pub fn new(orders: Arc<MemoryOrderRepository>) -> Self {
        Self {
            drivers: DashMap::new(),
            orders,
        }
    }

    pub fn register_driver(&self, id: Uuid, name: impl Into<String>, location: GeoPoint) -> DriverRecord {
        let record = DriverRecord {
            id,
            name: name.into(),
            location,
            online: true,
            updated_at: Utc::now(),
        };
        self.drivers.insert(id, record.clone());
        record
    }

    pub fn set_online(&self, id: Uuid, online: bool) -> Result<DriverRecord, RepositoryError> {
        let mut record = self
            .drivers
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound { entity: "driver", id })?;
        record.online = online;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    pub fn get(&self, id: Uuid) -> Option<DriverRecord> {
        self.drivers.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }
}

#[async_trait]
impl LocationRepository for MemoryLocationRepository {
    async fn find_available_drivers_within_radius(
        &self,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<NearbyDriver>, RepositoryError> {
        let nearby: Vec<NearbyDriver> = self
            .drivers
            .iter()
            .filter(|entry| entry.online && haversine_km(&entry.location, &center) <= radius_km)
            .map(|entry| NearbyDriver {
                driver_id: entry.id,
                name: entry.name.clone(),
                location: entry.location,
            })
            .collect();

        // Collected first so no driver shard is held while scanning orders.
        Ok(nearby
            .into_iter()
            .filter(|driver| !self.orders.has_active_order(driver.driver_id))
            .collect())
    }

    async fn update_location(
        &self,
        driver_id: Uuid,
        location: GeoPoint,
    ) -> Result<(), RepositoryError> {
        let mut record = self
            .drivers
            .get_mut(&driver_id)
            .ok_or(RepositoryError::NotFound { entity: "driver", id: driver_id })?;
        record.location = location;
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{MemoryAssignmentRepository, MemoryLocationRepository, MemoryOrderRepository};
    use crate::models::assignment::{AssignmentStatus, OrderAssignment};
    use crate::models::driver::{DriverWithDistance, GeoPoint};
    use crate::models::order::{NewOrder, Order, OrderStatus};
    use crate::repository::{
        AssignmentRepository, LocationRepository, OrderRepository, RepositoryError,
    };

    fn candidate(driver_id: Uuid) -> DriverWithDistance {
        DriverWithDistance {
            driver_id,
            name: "driver".to_string(),
            location: GeoPoint::new(19.43, -99.13),
            distance_km: 1.0,
            eta_minutes: 3,
            estimated: false,
        }
    }

    fn offer(order_id: Uuid, driver_id: Uuid, attempt: i32) -> OrderAssignment {
        OrderAssignment::offer(
            order_id,
            &candidate(driver_id),
            attempt,
            2.0,
            std::time::Duration::from_secs(10),
        )
    }

    fn order() -> Order {
        Order::new(NewOrder {
            merchant_id: Uuid::new_v4(),
            pickup: GeoPoint::new(19.4326, -99.1332),
            pickup_address: "pickup".to_string(),
            delivery: GeoPoint::new(19.44, -99.14),
            delivery_address: "delivery".to_string(),
            total_cents: 1_000,
        })
    }

    #[tokio::test]
    async fn status_update_only_applies_to_pending_rows() {
        let repo = MemoryAssignmentRepository::new();
        let assignment = offer(Uuid::new_v4(), Uuid::new_v4(), 1);
        repo.create(assignment.clone()).await.unwrap();

        assert!(repo
            .update_status(assignment.id, AssignmentStatus::Timeout)
            .await
            .unwrap());
        assert!(!repo
            .update_status_with_reason(
                assignment.id,
                AssignmentStatus::Rejected,
                Some("too far".to_string())
            )
            .await
            .unwrap());

        let stored = repo.find_by_id(assignment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentStatus::Timeout);
        assert!(stored.rejection_reason.is_none());
    }

    #[tokio::test]
    async fn second_accept_for_same_order_is_a_constraint_violation() {
        let repo = MemoryAssignmentRepository::new();
        let order_id = Uuid::new_v4();
        let first = offer(order_id, Uuid::new_v4(), 1);
        let second = offer(order_id, Uuid::new_v4(), 2);
        repo.create(first.clone()).await.unwrap();
        repo.create(second.clone()).await.unwrap();

        assert!(repo.update_status(first.id, AssignmentStatus::Accepted).await.unwrap());
        let result = repo.update_status(second.id, AssignmentStatus::Accepted).await;
        assert!(matches!(result, Err(RepositoryError::Constraint(_))));
    }

    #[tokio::test]
    async fn expiry_and_exclusion_cover_every_closed_offer() {
        let repo = MemoryAssignmentRepository::new();
        let order_id = Uuid::new_v4();
        let rejected = offer(order_id, Uuid::new_v4(), 1);
        let timed_out = offer(order_id, Uuid::new_v4(), 2);
        let pending = offer(order_id, Uuid::new_v4(), 3);
        for row in [&rejected, &timed_out, &pending] {
            repo.create(row.clone()).await.unwrap();
        }
        repo.update_status(rejected.id, AssignmentStatus::Rejected).await.unwrap();
        repo.update_status(timed_out.id, AssignmentStatus::Timeout).await.unwrap();

        assert_eq!(repo.expire_pending_by_order_id(order_id).await.unwrap(), 1);
        assert_eq!(repo.get_next_attempt_number(order_id).await.unwrap(), 4);

        let mut excluded = repo.get_rejected_driver_ids_by_order_id(order_id).await.unwrap();
        excluded.sort();
        let mut expected = vec![rejected.driver_id, timed_out.driver_id, pending.driver_id];
        expected.sort();
        assert_eq!(excluded, expected);
    }

    #[tokio::test]
    async fn stale_pending_rows_are_found_by_cutoff() {
        let repo = MemoryAssignmentRepository::new();
        let mut stale = offer(Uuid::new_v4(), Uuid::new_v4(), 1);
        stale.expires_at = Utc::now() - Duration::seconds(30);
        let fresh = offer(Uuid::new_v4(), Uuid::new_v4(), 1);
        repo.create(stale.clone()).await.unwrap();
        repo.create(fresh).await.unwrap();

        let found = repo.find_stale_pending(Utc::now()).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, stale.id);
    }

    #[tokio::test]
    async fn cancelled_order_cannot_be_assigned_or_accepted() {
        let repo = MemoryOrderRepository::new();
        let order = order();
        let id = order.id;
        repo.insert(order).await.unwrap();
        repo.update_status(id, OrderStatus::Cancelled).await.unwrap();

        assert!(!repo.assign_driver(id, Uuid::new_v4()).await.unwrap());
        assert!(!repo.update_accepted(id, Uuid::new_v4()).await.unwrap());
        let stored = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert!(stored.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn missing_order_is_none_not_error() {
        let repo = MemoryOrderRepository::new();
        assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
        assert!(matches!(
            repo.update_status(Uuid::new_v4(), OrderStatus::Cancelled).await,
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn radius_query_skips_offline_busy_and_distant_drivers() {
        let orders = Arc::new(MemoryOrderRepository::new());
        let locations = MemoryLocationRepository::new(orders.clone());
        let center = GeoPoint::new(19.4326, -99.1332);

        let near = Uuid::new_v4();
        let offline = Uuid::new_v4();
        let busy = Uuid::new_v4();
        let far = Uuid::new_v4();
        locations.register_driver(near, "near", GeoPoint::new(19.4330, -99.1335));
        locations.register_driver(offline, "offline", GeoPoint::new(19.4330, -99.1335));
        locations.register_driver(busy, "busy", GeoPoint::new(19.4330, -99.1335));
        locations.register_driver(far, "far", GeoPoint::new(19.60, -99.13));
        locations.set_online(offline, false).unwrap();

        let order = order();
        let order_id = order.id;
        orders.insert(order).await.unwrap();
        orders.update_status(order_id, OrderStatus::SearchingDriver).await.unwrap();
        orders.update_accepted(order_id, busy).await.unwrap();

        let found = locations
            .find_available_drivers_within_radius(center, 2.0)
            .await
            .unwrap();
        let ids: Vec<Uuid> = found.iter().map(|d| d.driver_id).collect();
        assert_eq!(ids, vec![near]);
    }
}
