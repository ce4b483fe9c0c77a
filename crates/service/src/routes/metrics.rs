//! Prometheus exposition of the reconciler's metrics.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Registers help text for the metrics the engine records.
pub fn describe() {
    metrics::describe_counter!(
        "reconciler_events_received_total",
        "Payment events received, by source (live or sweep)"
    );
    metrics::describe_counter!(
        "reconciler_settlements_total",
        "Transactions moved from pending to confirmed"
    );
    metrics::describe_counter!(
        "reconciler_integrity_failures_total",
        "Events rejected because sender or token contradict the stored transaction"
    );
    metrics::describe_counter!(
        "reconciler_correlations_total",
        "Live correlation outcomes, by outcome"
    );
    metrics::describe_counter!(
        "reconciler_sweep_expired_total",
        "Pending transactions failed after the expiry window"
    );
    metrics::describe_counter!(
        "reconciler_subscription_reconnects_total",
        "Live subscription reconnect attempts"
    );
    metrics::describe_counter!(
        "reconciler_loop_restarts_total",
        "Loop restarts after a panic, by loop"
    );
    metrics::describe_counter!(
        "reconciler_errors_total",
        "Correlation or sweep errors, by loop"
    );
    metrics::describe_counter!(
        "reconciler_undecodable_logs_total",
        "Contract logs skipped because they could not be decoded"
    );
    metrics::describe_histogram!(
        "reconciler_sweep_duration_seconds",
        metrics::Unit::Seconds,
        "Duration of one sweep pass"
    );
    metrics::describe_histogram!(
        "reconciler_settlement_duration_seconds",
        metrics::Unit::Seconds,
        "Duration of one settlement, retries included"
    );
}

/// GET /metrics
pub async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    ([(CONTENT_TYPE, PROMETHEUS_TEXT)], handle.render())
}
