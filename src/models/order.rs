use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    SearchingDriver,
    Assigned,
    Accepted,
    PickedUp,
    InTransit,
    Delivered,
    Cancelled,
    NoDriverAvailable,
}

impl OrderStatus {
    /// Statuses that tie a driver to the order. A driver has at most one
    /// order in one of these at a time.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::Assigned
                | OrderStatus::Accepted
                | OrderStatus::PickedUp
                | OrderStatus::InTransit
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::NoDriverAvailable
        )
    }

    /// Customers may cancel until the driver has the goods.
    pub fn can_cancel(self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::SearchingDriver
                | OrderStatus::Assigned
                | OrderStatus::Accepted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::SearchingDriver => "searching_driver",
            OrderStatus::Assigned => "assigned",
            OrderStatus::Accepted => "accepted",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::InTransit => "in_transit",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::NoDriverAvailable => "no_driver_available",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub pickup: GeoPoint,
    pub pickup_address: String,
    pub delivery: GeoPoint,
    pub delivery_address: String,
    pub delivery_code: u32,
    pub total_cents: i64,
    pub status: OrderStatus,
    pub distance_km: Option<f64>,
    pub eta_minutes: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub picked_up_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub merchant_id: Uuid,
    pub pickup: GeoPoint,
    pub pickup_address: String,
    pub delivery: GeoPoint,
    pub delivery_address: String,
    pub total_cents: i64,
}

impl Order {
    pub fn new(new_order: NewOrder) -> Self {
        Self {
            id: Uuid::new_v4(),
            merchant_id: new_order.merchant_id,
            driver_id: None,
            pickup: new_order.pickup,
            pickup_address: new_order.pickup_address,
            delivery: new_order.delivery,
            delivery_address: new_order.delivery_address,
            delivery_code: rand::thread_rng().gen_range(1000..10000),
            total_cents: new_order.total_cents,
            status: OrderStatus::Pending,
            distance_km: None,
            eta_minutes: None,
            created_at: Utc::now(),
            assigned_at: None,
            accepted_at: None,
            picked_up_at: None,
            delivered_at: None,
            cancelled_at: None,
        }
    }

    /// Applies `status` and stamps the matching lifecycle timestamp.
    pub fn set_status(&mut self, status: OrderStatus, at: DateTime<Utc>) {
        self.status = status;
        match status {
            OrderStatus::Assigned => self.assigned_at = Some(at),
            OrderStatus::Accepted => self.accepted_at = Some(at),
            OrderStatus::PickedUp => self.picked_up_at = Some(at),
            OrderStatus::Delivered => self.delivered_at = Some(at),
            OrderStatus::Cancelled => self.cancelled_at = Some(at),
            _ => {}
        }
    }

    /// Where the driver is heading once the order is theirs: the pickup
    /// until collected, then the delivery point.
    pub fn current_destination(&self) -> Option<GeoPoint> {
        match self.status {
            OrderStatus::Accepted => Some(self.pickup),
            OrderStatus::PickedUp | OrderStatus::InTransit => Some(self.delivery),
            _ => None,
        }
    }
}
