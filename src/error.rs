use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::distance::DistanceError;
use crate::models::order::OrderStatus;
use crate::repository::RepositoryError;

/// Outcomes of the dispatch core that callers can tell apart.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("no pending assignment for order {order_id} and driver {driver_id}")]
    AssignmentNotFound { order_id: Uuid, driver_id: Uuid },

    #[error("assignment {0} is no longer pending")]
    AssignmentNotPending(Uuid),

    #[error("assignment {0} expired before a response arrived")]
    AssignmentExpired(Uuid),

    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("order {0} is handled by another driver")]
    DriverMismatch(Uuid),

    #[error("delivery code does not match for order {0}")]
    InvalidDeliveryCode(Uuid),

    #[error("no driver available for order {0}")]
    NoDriverAvailable(Uuid),

    #[error("order {0} was cancelled")]
    OrderCancelled(Uuid),

    #[error("acceptance of order {order_id} could not be recorded: {source}")]
    AcceptanceNotRecorded {
        order_id: Uuid,
        #[source]
        source: RepositoryError,
    },

    #[error("driver search for order {0} aborted")]
    SearchAborted(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Distance(#[from] DistanceError),
}

impl DispatchError {
    /// Infrastructure blips the search loop absorbs and retries next round.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DispatchError::Repository(RepositoryError::Unavailable(_))
                | DispatchError::Repository(RepositoryError::Duplicate(_))
                | DispatchError::Distance(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no drivers available")]
    NoAvailableDrivers,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::OrderNotFound(_)
            | DispatchError::AssignmentNotFound { .. }
            | DispatchError::Repository(RepositoryError::NotFound { .. }) => {
                AppError::NotFound(err.to_string())
            }
            DispatchError::AssignmentNotPending(_)
            | DispatchError::AssignmentExpired(_)
            | DispatchError::InvalidTransition { .. }
            | DispatchError::DriverMismatch(_)
            | DispatchError::OrderCancelled(_) => AppError::Conflict(err.to_string()),
            DispatchError::InvalidDeliveryCode(_) => AppError::BadRequest(err.to_string()),
            DispatchError::NoDriverAvailable(_) => AppError::NoAvailableDrivers,
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        DispatchError::from(err).into()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NoAvailableDrivers => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no drivers available".to_string(),
            ),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::{AppError, DispatchError};
    use crate::repository::RepositoryError;

    #[test]
    fn only_infrastructure_errors_are_transient() {
        assert!(DispatchError::Repository(RepositoryError::Unavailable("db".into())).is_transient());
        assert!(!DispatchError::OrderCancelled(Uuid::nil()).is_transient());
        assert!(!DispatchError::OrderNotFound(Uuid::nil()).is_transient());
    }

    #[test]
    fn late_responses_map_to_conflict() {
        let err: AppError = DispatchError::AssignmentExpired(Uuid::nil()).into();
        assert!(matches!(err, AppError::Conflict(_)));

        let err: AppError = DispatchError::AssignmentNotFound {
            order_id: Uuid::nil(),
            driver_id: Uuid::nil(),
        }
        .into();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
