//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use common::{Money, OrderId, OwnerId, Page, ProductId};
use orders::{CreateOrder, NewOrderLine, Order, OrderError};
use payments::Payment;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// Header set by the authentication layer in front of the API.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Caller identity taken from [`OWNER_HEADER`].
#[derive(Debug, Clone)]
pub struct Owner(pub OwnerId);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ApiError::Unauthorized(format!("Missing {OWNER_HEADER} header")))?;
        Ok(Owner(OwnerId::new(value)))
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<OrderItemRequest>,
    #[serde(default)]
    pub shipping_address: Option<String>,
}

#[derive(Deserialize)]
pub struct OrderItemRequest {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub owner_id: String,
    pub status: String,
    pub items: Vec<OrderItemResponse>,
    pub total_cents: i64,
    pub shipping_address: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct OrderItemResponse {
    pub product_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
    pub subtotal_cents: i64,
    pub reservation_confirmed: bool,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id.to_string(),
            owner_id: order.owner.to_string(),
            status: order.status.to_string(),
            items: order
                .lines
                .iter()
                .map(|line| OrderItemResponse {
                    product_id: line.product_id.to_string(),
                    product_name: line.product_name.clone(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price.cents(),
                    subtotal_cents: line.subtotal.cents(),
                    reservation_confirmed: line.reservation_confirmed,
                })
                .collect(),
            total_cents: order.total.cents(),
            shipping_address: order.shipping_address.clone(),
            version: order.version.as_i64(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub order_id: String,
    pub status: String,
    pub amount_cents: i64,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id.to_string(),
            order_id: payment.order_id.to_string(),
            status: payment.status.to_string(),
            amount_cents: payment.amount.cents(),
            transaction_id: payment.transaction_id,
            failure_reason: payment.failure_reason,
        }
    }
}

// -- Handlers --

/// POST /orders — create an order and reserve its stock.
///
/// Answers 201 with the order in `INVENTORY_RESERVED`; a line that cannot be
/// reserved rejects the whole order with 409.
#[tracing::instrument(skip(state, owner, req), fields(owner = %owner.0))]
pub async fn create(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let request = CreateOrder {
        owner: owner.0,
        lines: req
            .items
            .into_iter()
            .map(|item| NewOrderLine {
                product_id: ProductId::new(item.product_id),
                product_name: item.product_name,
                quantity: item.quantity,
                unit_price: Money::from_cents(item.unit_price_cents),
            })
            .collect(),
        shipping_address: req.shipping_address,
    };

    let order = state.coordinator.submit_order(request).await?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(&order))))
}

/// GET /orders — the caller's orders, newest first.
#[tracing::instrument(skip(state, owner), fields(owner = %owner.0))]
pub async fn list(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Query(page): Query<Page>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = state.coordinator.list_orders(&owner.0, page).await?;
    Ok(Json(orders.iter().map(OrderResponse::from).collect()))
}

/// GET /orders/:id — one of the caller's orders.
#[tracing::instrument(skip(state, owner), fields(owner = %owner.0))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = load_owned(&state, &owner, &id).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// POST /orders/:id/cancel — cancel an order that has not shipped.
#[tracing::instrument(skip(state, owner), fields(owner = %owner.0))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.coordinator.cancel_order(order_id, &owner.0).await?;
    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/:id/payment — the payment recorded for an order.
#[tracing::instrument(skip(state, owner), fields(owner = %owner.0))]
pub async fn payment(
    State(state): State<Arc<AppState>>,
    owner: Owner,
    Path(id): Path<String>,
) -> Result<Json<PaymentResponse>, ApiError> {
    let order = load_owned(&state, &owner, &id).await?;
    let payment = state.payments.get_payment_by_order(order.id).await?;
    Ok(Json(PaymentResponse::from(payment)))
}

async fn load_owned(state: &AppState, owner: &Owner, id: &str) -> Result<Order, ApiError> {
    let order_id = parse_order_id(id)?;
    let order = state.coordinator.get_order(order_id).await?;
    if order.owner != owner.0 {
        return Err(OrderError::NotOwner(order_id).into());
    }
    Ok(order)
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))?;
    Ok(OrderId::from_uuid(uuid))
}
