use common::{OrderId, ProductId, Version};
use inventory::GatewayError;
use thiserror::Error;

use crate::status::OrderStatus;

/// Failure of a call to the inventory reservation gateway.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// The circuit breaker is open; the call was not attempted.
    #[error("Inventory service unavailable")]
    Unavailable,

    /// The gateway answered with an error.
    #[error("Inventory gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Errors that can occur in the order service.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The request was rejected before anything was persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The caller does not own the order.
    #[error("Order {0} does not belong to the caller")]
    NotOwner(OrderId),

    /// The order's status does not permit the action.
    #[error("Cannot {action} order {id} in status {status}")]
    InvalidState {
        id: OrderId,
        status: OrderStatus,
        action: &'static str,
    },

    /// A line could not be reserved; the order was cancelled.
    #[error("Insufficient stock for product {0}")]
    InsufficientStock(ProductId),

    /// The reservation call failed; the order was cancelled.
    #[error("Reservation failed: {0}")]
    Reservation(#[from] ReservationError),

    /// Optimistic concurrency check failed.
    #[error("Concurrency conflict on order {id}: expected version {expected}")]
    ConcurrencyConflict { id: OrderId, expected: Version },

    /// A stored row could not be mapped back to an order.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// The task running order creation panicked or was aborted.
    #[error("Order creation interrupted: {0}")]
    Interrupted(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;
