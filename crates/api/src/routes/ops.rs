//! Operator endpoints over each service's failed events.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::Page;
use dead_letter::{FailedEvent, FailedEventId, ReplayOutcome};
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct CountResponse {
    pub service: String,
    pub count: u64,
}

#[derive(Serialize)]
pub struct RetryResponse {
    pub id: i64,
    pub success: bool,
    pub outcome: &'static str,
    pub error: Option<String>,
}

impl RetryResponse {
    fn new(id: FailedEventId, outcome: ReplayOutcome) -> Self {
        let success = outcome.succeeded();
        let (outcome, error) = match outcome {
            ReplayOutcome::Resolved => ("RESOLVED", None),
            ReplayOutcome::Failed { error } => ("FAILED", Some(error)),
            ReplayOutcome::RetriesExhausted => ("RETRIES_EXHAUSTED", None),
        };
        Self {
            id: id.as_i64(),
            success,
            outcome,
            error,
        }
    }
}

/// GET /ops/:service/failed-events — unresolved events, newest first.
#[tracing::instrument(skip(state))]
pub async fn list_unresolved(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<FailedEvent>>, ApiError> {
    let events = state.failed_events(&service)?.list_unresolved(page).await?;
    Ok(Json(events))
}

/// GET /ops/:service/failed-events/failed — events waiting for an operator.
#[tracing::instrument(skip(state))]
pub async fn list_failed(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<FailedEvent>>, ApiError> {
    let events = state.failed_events(&service)?.list_failed(page).await?;
    Ok(Json(events))
}

/// GET /ops/:service/failed-events/count
#[tracing::instrument(skip(state))]
pub async fn count(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.failed_events(&service)?.failed_count().await?;
    Ok(Json(CountResponse { service, count }))
}

/// GET /ops/:service/failed-events/:id
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path((service, id)): Path<(String, String)>,
) -> Result<Json<FailedEvent>, ApiError> {
    let id = parse_failed_event_id(&id)?;
    let event = state.failed_events(&service)?.get(id).await?;
    Ok(Json(event))
}

/// POST /ops/:service/failed-events/:id/retry — replay through the live handler.
///
/// A replay that fails again is still a 200; `success` tells the outcome.
#[tracing::instrument(skip(state))]
pub async fn retry(
    State(state): State<Arc<AppState>>,
    Path((service, id)): Path<(String, String)>,
) -> Result<Json<RetryResponse>, ApiError> {
    let id = parse_failed_event_id(&id)?;
    let outcome = state.failed_events(&service)?.retry(id).await?;
    Ok(Json(RetryResponse::new(id, outcome)))
}

/// POST /ops/:service/failed-events/:id/discard
#[tracing::instrument(skip(state))]
pub async fn discard(
    State(state): State<Arc<AppState>>,
    Path((service, id)): Path<(String, String)>,
) -> Result<Json<FailedEvent>, ApiError> {
    let id = parse_failed_event_id(&id)?;
    let event = state.failed_events(&service)?.discard(id).await?;
    Ok(Json(event))
}

fn parse_failed_event_id(id: &str) -> Result<FailedEventId, ApiError> {
    id.parse::<i64>()
        .map(FailedEventId::new)
        .map_err(|e| ApiError::BadRequest(format!("Invalid failed event id: {e}")))
}
