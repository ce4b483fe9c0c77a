//! Runtime for the payment reconciliation engine.
//!
//! Hosts the engine next to a small HTTP surface for operators: loop
//! liveness on `/health` and Prometheus metrics on `/metrics`.

pub mod config;
pub mod error;
pub mod routes;

use axum::Router;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use reconciler::EngineHealth;
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError, LogFormat};
pub use error::ServiceError;

/// Creates the operator router.
pub fn create_app(health: EngineHealth, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .with_state(health)
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}
