//! Saga runtime daemon.
//!
//! Hosts the scheduler loop and the message dispatcher, and exposes admin
//! endpoints for scheduled operations and persisted sagas, with structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod runtime;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use error::{ApiError, StartupError};
pub use routes::{AppState, Storage};
pub use runtime::{RunningRuntime, Runtime};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route(
            "/scheduler/operations/{id}",
            get(routes::operations::get).delete(routes::operations::cancel),
        )
        .route("/sagas/{saga_type}/{uuid}", get(routes::sagas::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
