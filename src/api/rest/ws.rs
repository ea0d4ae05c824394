use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::notify::order_channel;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub user_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    if params.user_id.is_none() && params.order_id.is_none() {
        return Err(AppError::BadRequest(
            "user_id or order_id is required".to_string(),
        ));
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, params)))
}

async fn next_event(rx: &mut Option<broadcast::Receiver<String>>) -> Option<String> {
    let Some(receiver) = rx.as_mut() else {
        return std::future::pending().await;
    };

    loop {
        match receiver.recv().await {
            Ok(payload) => return Some(payload),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "websocket client lagging, events dropped");
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, params: WsParams) {
    let (mut sender, mut receiver) = socket.split();
    let mut user_rx = params.user_id.map(|id| state.hub.subscribe_user(id));
    let mut order_rx = params
        .order_id
        .map(|id| state.hub.subscribe_channel(&order_channel(id)));

    info!(user_id = ?params.user_id, order_id = ?params.order_id, "websocket client connected");

    let send_task = tokio::spawn(async move {
        loop {
            let payload = tokio::select! {
                event = next_event(&mut user_rx) => event,
                event = next_event(&mut order_rx) => event,
            };
            let Some(payload) = payload else { break };

            if sender.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!(user_id = ?params.user_id, order_id = ?params.order_id, "websocket client disconnected");
}
