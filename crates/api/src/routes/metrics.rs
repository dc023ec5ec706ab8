//! Prometheus scrape endpoint for the saga's counters and histograms.
//!
//! Series include `orders_created_total`, `orders_rejected_total{reason}`,
//! `orders_compensations_total`, `order_creation_duration_seconds`,
//! `inventory_reservations_success_total`, `payments_idempotent_skip_total`,
//! `consumer_retries_total{topic,group}`, `dead_letter_events_total{topic,group}`
//! and `circuit_breaker_transitions_total{breaker,to}`. Descriptions are
//! registered by [`crate::describe_metrics`].

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics — text exposition of everything recorded through
/// `MetricsTelemetry` since startup.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, TEXT_FORMAT)],
        handle.render(),
    )
}
