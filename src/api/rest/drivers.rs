use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::api::rest::orders::validate_point;
use crate::engine::location::LocationUpdate;
use crate::error::AppError;
use crate::models::assignment::OrderAssignment;
use crate::models::driver::GeoPoint;
use crate::repository::memory::DriverRecord;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(register_driver))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/location", patch(update_location))
        .route("/drivers/:id/availability", patch(update_availability))
        .route("/drivers/:id/assignments", get(pending_assignments))
}

#[derive(Deserialize)]
pub struct RegisterDriverRequest {
    pub id: Option<Uuid>,
    pub name: String,
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub online: bool,
}

async fn register_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterDriverRequest>,
) -> Result<Json<DriverRecord>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    validate_point("location", &payload.location)?;

    let id = payload.id.unwrap_or_else(Uuid::new_v4);
    Ok(Json(
        state
            .drivers
            .register_driver(id, payload.name, payload.location),
    ))
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverRecord>, AppError> {
    state
        .drivers
        .get(id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<LocationUpdate>, AppError> {
    validate_point("location", &payload.location)?;
    Ok(Json(state.locations.update_location(id, payload.location).await?))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<DriverRecord>, AppError> {
    Ok(Json(state.drivers.set_online(id, payload.online)?))
}

async fn pending_assignments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OrderAssignment>>, AppError> {
    Ok(Json(state.dispatcher.get_pending_assignments_by_driver(id).await?))
}
