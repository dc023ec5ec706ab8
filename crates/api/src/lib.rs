//! HTTP API and composition root for the order fulfillment saga.
//!
//! Runs the inventory, order and payment services in one process over a
//! shared event bus, and exposes order, stock and operator endpoints with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, Services, Stores};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/orders",
            post(routes::orders::create).get(routes::orders::list),
        )
        .route("/orders/{id}", get(routes::orders::get))
        .route("/orders/{id}/cancel", post(routes::orders::cancel))
        .route("/orders/{id}/payment", get(routes::orders::payment))
        .route("/inventory/{product_id}", get(routes::inventory::check))
        .route(
            "/ops/{service}/failed-events",
            get(routes::ops::list_unresolved),
        )
        .route(
            "/ops/{service}/failed-events/failed",
            get(routes::ops::list_failed),
        )
        .route("/ops/{service}/failed-events/count", get(routes::ops::count))
        .route("/ops/{service}/failed-events/{id}", get(routes::ops::get))
        .route(
            "/ops/{service}/failed-events/{id}/retry",
            post(routes::ops::retry),
        )
        .route(
            "/ops/{service}/failed-events/{id}/discard",
            post(routes::ops::discard),
        )
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

/// Registers descriptions for the saga's metrics with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!("orders_created_total", "Orders whose stock was fully reserved");
    metrics::describe_counter!(
        "orders_rejected_total",
        "Orders rejected during reservation, by reason"
    );
    metrics::describe_counter!(
        "orders_compensations_total",
        "Orders whose earlier reservations were released after a failed line"
    );
    metrics::describe_histogram!(
        "order_creation_duration_seconds",
        metrics::Unit::Seconds,
        "Time to create an order and reserve its stock"
    );
    metrics::describe_counter!(
        "inventory_reservations_success_total",
        "Successful stock reservations"
    );
    metrics::describe_counter!(
        "payments_idempotent_skip_total",
        "order-created deliveries skipped because the order was already charged"
    );
    metrics::describe_counter!(
        "dead_letter_events_total",
        "Messages persisted as failed events"
    );
    metrics::describe_counter!(
        "publish_failures_total",
        "Events committed locally but not published"
    );
    metrics::describe_counter!(
        "circuit_breaker_transitions_total",
        "Circuit breaker state changes"
    );
}
