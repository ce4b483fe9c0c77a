//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use reconciler::{EngineHealth, HealthSnapshot};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub loops: HealthSnapshot,
}

/// GET /health: reports liveness of the live and sweep loops.
///
/// Responds 503 while either loop is down or restarting.
pub async fn check(State(health): State<EngineHealth>) -> (StatusCode, Json<HealthResponse>) {
    let loops = health.snapshot().await;
    let (code, status) = if loops.is_healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (code, Json(HealthResponse { status, loops }))
}
