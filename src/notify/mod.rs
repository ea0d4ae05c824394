pub mod hub;

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::driver::GeoPoint;
use crate::models::order::OrderStatus;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Channel carrying every event about one order.
pub fn order_channel(order_id: Uuid) -> String {
    format!("order:{order_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    NewOrderOffer {
        order_id: Uuid,
        assignment_id: Uuid,
        pickup: GeoPoint,
        pickup_address: String,
        delivery: GeoPoint,
        delivery_address: String,
        total_cents: i64,
        distance_km: f64,
        eta_minutes: i32,
        expires_at: DateTime<Utc>,
    },
    OrderAccepted {
        order_id: Uuid,
        driver_id: Uuid,
    },
    OrderStatusChanged {
        order_id: Uuid,
        status: OrderStatus,
    },
    EtaUpdated {
        order_id: Uuid,
        driver_id: Uuid,
        distance_km: f64,
        eta_minutes: i32,
    },
}

/// WebSocket-style fan-out: one user, or everyone subscribed to a channel.
pub trait RealtimeHub: Send + Sync {
    fn send_to_user(&self, user_id: Uuid, event: &RealtimeEvent) -> Result<(), NotifyError>;

    fn broadcast(&self, channel: &str, event: &RealtimeEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn send(&self, user_id: Uuid, message: PushMessage) -> Result<(), NotifyError>;
}

/// Push sink that only writes the message to the log.
#[derive(Debug, Default)]
pub struct LogPushNotifier;

#[async_trait]
impl PushNotifier for LogPushNotifier {
    async fn send(&self, user_id: Uuid, message: PushMessage) -> Result<(), NotifyError> {
        info!(user_id = %user_id, title = %message.title, "push notification");
        Ok(())
    }
}

fn log_failure<E: Display>(what: &'static str, target: &str, result: Result<(), E>) {
    if let Err(err) = result {
        warn!(target_id = %target, error = %err, "{what} failed; continuing");
    }
}

/// Fire-and-forget front for the realtime hub and push sink. Every method
/// logs failures and returns nothing: notification problems never reach
/// the dispatch loop.
#[derive(Clone)]
pub struct Notifier {
    hub: Arc<dyn RealtimeHub>,
    push: Arc<dyn PushNotifier>,
}

impl Notifier {
    pub fn new(hub: Arc<dyn RealtimeHub>, push: Arc<dyn PushNotifier>) -> Self {
        Self { hub, push }
    }

    pub fn send_to_user(&self, user_id: Uuid, event: &RealtimeEvent) {
        log_failure(
            "realtime send",
            &user_id.to_string(),
            self.hub.send_to_user(user_id, event),
        );
    }

    pub fn broadcast_order(&self, order_id: Uuid, event: &RealtimeEvent) {
        let channel = order_channel(order_id);
        log_failure("realtime broadcast", &channel, self.hub.broadcast(&channel, event));
    }

    /// Dispatches the push on its own task; the caller never waits for it.
    pub fn push_detached(&self, user_id: Uuid, message: PushMessage) {
        let push = Arc::clone(&self.push);
        tokio::spawn(async move {
            log_failure("push notification", &user_id.to_string(), push.send(user_id, message).await);
        });
    }
}
