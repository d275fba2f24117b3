//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;
use scheduler::SchedulerError;
use thiserror::Error;
use transport::TransportError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Scheduler store error.
    Scheduler(SchedulerError),
    /// Saga store error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Scheduler(err) => scheduler_error_to_response(err),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn scheduler_error_to_response(err: SchedulerError) -> (StatusCode, String) {
    match &err {
        SchedulerError::ScheduledOperationNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        SchedulerError::DuplicateOperation(_) => (StatusCode::CONFLICT, err.to_string()),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    match &err {
        SagaError::SagaNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        SagaError::DuplicateSaga(_)
        | SagaError::ConcurrentModification { .. }
        | SagaError::InvalidSagaStatus { .. } => (StatusCode::CONFLICT, err.to_string()),
        SagaError::SagaExpired(_) | SagaError::SagaClosed { .. } => {
            (StatusCode::GONE, err.to_string())
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        ApiError::Scheduler(err)
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

/// Errors that stop the daemon from starting.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Metrics recorder error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
