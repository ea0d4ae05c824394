use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;
use uuid::Uuid;

use crate::notify::{NotifyError, RealtimeEvent, RealtimeHub};

/// In-process fan-out backing the `/ws` endpoint. Each user id and channel
/// name gets a broadcast sender on first subscription; sends to a key with
/// no subscribers are dropped.
pub struct WsHub {
    users: DashMap<Uuid, broadcast::Sender<String>>,
    channels: DashMap<String, broadcast::Sender<String>>,
    buffer_size: usize,
}

impl WsHub {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            users: DashMap::new(),
            channels: DashMap::new(),
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn subscribe_user(&self, user_id: Uuid) -> broadcast::Receiver<String> {
        self.users
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .subscribe()
    }

    pub fn subscribe_channel(&self, channel: &str) -> broadcast::Receiver<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .subscribe()
    }

    /// Drops senders nobody listens to any more.
    pub fn prune(&self) {
        self.users.retain(|_, tx| tx.receiver_count() > 0);
        self.channels.retain(|_, tx| tx.receiver_count() > 0);
    }

    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|entry| entry.receiver_count()).sum()
    }
}

fn deliver(tx: Option<broadcast::Sender<String>>, payload: String, key: &str) {
    match tx {
        Some(tx) => {
            // Err only means every receiver is gone.
            let delivered = tx.send(payload).unwrap_or(0);
            trace!(key = %key, delivered, "realtime event sent");
        }
        None => trace!(key = %key, "no realtime subscribers"),
    }
}

impl RealtimeHub for WsHub {
    fn send_to_user(&self, user_id: Uuid, event: &RealtimeEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(event)?;
        let tx = self.users.get(&user_id).map(|entry| entry.value().clone());
        deliver(tx, payload, &user_id.to_string());
        Ok(())
    }

    fn broadcast(&self, channel: &str, event: &RealtimeEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(event)?;
        let tx = self.channels.get(channel).map(|entry| entry.value().clone());
        deliver(tx, payload, channel);
        Ok(())
    }
}
