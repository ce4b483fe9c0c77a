//! Integration tests for the operator HTTP surface.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use reconciler::{EngineHealth, LoopKind, SweepReport};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");
            service::routes::metrics::describe();
            handle
        })
        .clone()
}

fn setup() -> (axum::Router, EngineHealth) {
    let health = EngineHealth::new();
    let app = service::create_app(health.clone(), get_metrics_handle());
    (app, health)
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_degraded_before_loops_start() {
    let (app, _health) = setup();

    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["live"]["running"], false);
    assert_eq!(json["sweep"]["running"], false);
    assert!(json["last_sweep"].is_null());
}

#[tokio::test]
async fn test_health_ok_when_both_loops_run() {
    let (app, health) = setup();
    health.set_running(LoopKind::Live, true).await;
    health.set_running(LoopKind::Sweep, true).await;
    health.record_restart(LoopKind::Live).await;
    health
        .record_sweep(SweepReport {
            examined: 3,
            confirmed: 1,
            expired: 1,
            ..SweepReport::default()
        })
        .await;

    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["live"]["restarts"], 1);
    assert_eq!(json["last_sweep"]["examined"], 3);
    assert_eq!(json["last_sweep"]["confirmed"], 1);
    assert!(!json["sweep"]["last_activity"].is_null());
}

#[tokio::test]
async fn test_health_degraded_when_one_loop_is_down() {
    let (app, health) = setup();
    health.set_running(LoopKind::Live, true).await;

    let (status, json) = get_json(app, "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["live"]["running"], true);
    assert_eq!(json["sweep"]["running"], false);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _health) = setup();
    metrics::counter!("reconciler_settlements_total").increment(1);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("reconciler_settlements_total"));
}
