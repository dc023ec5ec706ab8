//! Stock check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::ProductId;
use inventory::StockLevel;

use crate::error::ApiError;
use crate::state::AppState;

/// GET /inventory/:product_id — available stock of one product.
#[tracing::instrument(skip(state))]
pub async fn check(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
) -> Result<Json<StockLevel>, ApiError> {
    let level = state
        .reservations
        .check_stock(&ProductId::new(product_id))
        .await?;
    Ok(Json(level))
}
