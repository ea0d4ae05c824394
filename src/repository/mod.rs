pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::assignment::{AssignmentStatus, OrderAssignment};
use crate::models::driver::{GeoPoint, NearbyDriver};
use crate::models::order::{Order, OrderStatus};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{0} already exists")]
    Duplicate(Uuid),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Reads return `Ok(None)` for a missing row. Conditional writes return
/// `Ok(false)` when the row exists but is not in an expected state.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: Order) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, RepositoryError>;

    async fn update_status(&self, id: Uuid, status: OrderStatus) -> Result<(), RepositoryError>;

    /// Moves the order to `status` only if it is currently in one of `expected`.
    async fn update_status_if(
        &self,
        id: Uuid,
        expected: &[OrderStatus],
        status: OrderStatus,
    ) -> Result<bool, RepositoryError>;

    /// Points the order at `driver_id` in `assigned`, unless it was cancelled
    /// or otherwise left the search.
    async fn assign_driver(&self, id: Uuid, driver_id: Uuid) -> Result<bool, RepositoryError>;

    /// Returns an `assigned` order to `searching_driver` and drops its driver.
    async fn unassign_driver(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// Moves a still-searching order to `accepted` for `driver_id`.
    async fn update_accepted(&self, id: Uuid, driver_id: Uuid) -> Result<bool, RepositoryError>;

    async fn update_route_info(
        &self,
        id: Uuid,
        distance_km: f64,
        eta_minutes: i32,
    ) -> Result<(), RepositoryError>;

    async fn find_active_order_by_driver_id(
        &self,
        driver_id: Uuid,
    ) -> Result<Option<Order>, RepositoryError>;
}

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn create(&self, assignment: OrderAssignment) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OrderAssignment>, RepositoryError>;

    async fn find_pending_by_order_and_driver(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
    ) -> Result<Option<OrderAssignment>, RepositoryError>;

    /// Compare-and-swap from `pending`; `Ok(false)` if the row already moved on.
    async fn update_status(
        &self,
        id: Uuid,
        status: AssignmentStatus,
    ) -> Result<bool, RepositoryError>;

    async fn update_status_with_reason(
        &self,
        id: Uuid,
        status: AssignmentStatus,
        reason: Option<String>,
    ) -> Result<bool, RepositoryError>;

    async fn get_next_attempt_number(&self, order_id: Uuid) -> Result<i32, RepositoryError>;

    /// Forces every `pending` row of the order to `expired`, returning how many moved.
    async fn expire_pending_by_order_id(&self, order_id: Uuid) -> Result<usize, RepositoryError>;

    /// Drivers whose offer for this order was rejected, timed out or expired.
    async fn get_rejected_driver_ids_by_order_id(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<Uuid>, RepositoryError>;

    async fn find_pending_by_driver(
        &self,
        driver_id: Uuid,
    ) -> Result<Vec<OrderAssignment>, RepositoryError>;

    async fn find_by_order_id(&self, order_id: Uuid)
        -> Result<Vec<OrderAssignment>, RepositoryError>;

    /// `pending` rows whose `expires_at` is before `cutoff`.
    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<OrderAssignment>, RepositoryError>;
}

#[async_trait]
pub trait LocationRepository: Send + Sync {
    async fn find_available_drivers_within_radius(
        &self,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<NearbyDriver>, RepositoryError>;

    async fn update_location(
        &self,
        driver_id: Uuid,
        location: GeoPoint,
    ) -> Result<(), RepositoryError>;
}
