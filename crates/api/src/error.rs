//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, OrderError};
use event_store::EventStoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Domain logic error.
    Domain(DomainError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    match &err {
        DomainError::Order(order_err) => match order_err {
            OrderError::InvalidTransition { .. } | OrderError::AlreadyAccepted => {
                (StatusCode::CONFLICT, err.to_string())
            }
            OrderError::AmountNotPositive { .. }
            | OrderError::BelowMinimum { .. }
            | OrderError::InvalidQuote
            | OrderError::InvalidLimitPrice { .. }
            | OrderError::InvalidFillAmount { .. }
            | OrderError::NotLimitOrder { .. }
            | OrderError::UnknownOrderType(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        },
        DomainError::Position(_) => (StatusCode::CONFLICT, err.to_string()),
        DomainError::AggregateNotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
        DomainError::EventStore(EventStoreError::VersionConflict { .. })
        | DomainError::EventStore(EventStoreError::Duplicate(_)) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Domain(DomainError::Order(err))
    }
}
