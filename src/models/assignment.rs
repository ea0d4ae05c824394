use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::driver::DriverWithDistance;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Rejected,
    Timeout,
    Expired,
}

impl AssignmentStatus {
    /// A driver whose offer ended this way is never offered the same order again.
    pub fn excludes_driver(self) -> bool {
        matches!(
            self,
            AssignmentStatus::Rejected | AssignmentStatus::Timeout | AssignmentStatus::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Accepted => "accepted",
            AssignmentStatus::Rejected => "rejected",
            AssignmentStatus::Timeout => "timeout",
            AssignmentStatus::Expired => "expired",
        }
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One offer of one order to one driver. Rows accumulate per order and are
/// only ever mutated through their status/response fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAssignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub attempt_number: i32,
    pub search_radius_km: f64,
    pub distance_km: f64,
    pub eta_minutes: i32,
    pub status: AssignmentStatus,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub rejection_reason: Option<String>,
}

impl OrderAssignment {
    pub fn offer(
        order_id: Uuid,
        candidate: &DriverWithDistance,
        attempt_number: i32,
        search_radius_km: f64,
        timeout: std::time::Duration,
    ) -> Self {
        let now = Utc::now();
        let window = Duration::from_std(timeout).unwrap_or_else(|_| Duration::seconds(10));

        Self {
            id: Uuid::new_v4(),
            order_id,
            driver_id: candidate.driver_id,
            attempt_number,
            search_radius_km,
            distance_km: candidate.distance_km,
            eta_minutes: candidate.eta_minutes,
            status: AssignmentStatus::Pending,
            created_at: now,
            responded_at: None,
            expires_at: now + window,
            rejection_reason: None,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
