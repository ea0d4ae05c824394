use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::OrderAssignment;
use crate::models::driver::GeoPoint;
use crate::models::order::{NewOrder, Order};
use crate::repository::{AssignmentRepository, OrderRepository};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/assignments", get(list_assignments))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/accept", post(accept_order))
        .route("/orders/:id/reject", post(reject_order))
        .route("/orders/:id/pickup", post(mark_picked_up))
        .route("/orders/:id/in-transit", post(mark_in_transit))
        .route("/orders/:id/complete", post(complete_delivery))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub merchant_id: Uuid,
    pub pickup: GeoPoint,
    pub pickup_address: String,
    pub delivery: GeoPoint,
    pub delivery_address: String,
    pub total_cents: i64,
}

#[derive(Deserialize)]
pub struct DriverRequest {
    pub driver_id: Uuid,
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub driver_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub driver_id: Uuid,
    pub code: u32,
}

pub(crate) fn validate_point(field: &str, point: &GeoPoint) -> Result<(), AppError> {
    if !(-90.0..=90.0).contains(&point.lat) || !(-180.0..=180.0).contains(&point.lng) {
        return Err(AppError::BadRequest(format!("{field} is not a valid coordinate")));
    }
    Ok(())
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    validate_point("pickup", &payload.pickup)?;
    validate_point("delivery", &payload.delivery)?;
    if payload.total_cents < 0 {
        return Err(AppError::BadRequest("total_cents must be >= 0".to_string()));
    }

    let order = Order::new(NewOrder {
        merchant_id: payload.merchant_id,
        pickup: payload.pickup,
        pickup_address: payload.pickup_address,
        delivery: payload.delivery,
        delivery_address: payload.delivery_address,
        total_cents: payload.total_cents,
    });

    state.orders.insert(order.clone()).await?;
    state.dispatcher.spawn_assignment(order.id);

    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {id} not found")))?;

    Ok(Json(order))
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OrderAssignment>>, AppError> {
    Ok(Json(state.assignments.find_by_order_id(id).await?))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.deliveries.cancel_order(id).await?))
}

async fn accept_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<OrderAssignment>, AppError> {
    Ok(Json(state.dispatcher.accept_order(id, payload.driver_id).await?))
}

async fn reject_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<OrderAssignment>, AppError> {
    Ok(Json(
        state
            .dispatcher
            .reject_order(id, payload.driver_id, payload.reason)
            .await?,
    ))
}

async fn mark_picked_up(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.deliveries.mark_picked_up(id, payload.driver_id).await?))
}

async fn mark_in_transit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.deliveries.mark_in_transit(id, payload.driver_id).await?))
}

async fn complete_delivery(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteRequest>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(
        state
            .deliveries
            .complete_delivery(id, payload.driver_id, payload.code)
            .await?,
    ))
}
