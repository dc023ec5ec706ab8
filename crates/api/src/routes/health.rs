//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub services: Vec<&'static str>,
}

/// GET /health — returns system health status and the composed services.
pub async fn check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let mut services: Vec<&'static str> = state.failed_events.keys().copied().collect();
    services.sort_unstable();
    Json(HealthResponse {
        status: "ok",
        services,
    })
}
