use common::{OrderId, Version};
use thiserror::Error;

use crate::model::PaymentId;

/// Errors that can occur in the payment service.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// A payment already exists for the order.
    #[error("Payment already exists for order {0}")]
    DuplicateOrder(OrderId),

    #[error("Payment not found for order {0}")]
    NotFound(OrderId),

    /// Optimistic concurrency check failed.
    #[error("Concurrency conflict on payment {id}: expected version {expected}")]
    ConcurrencyConflict { id: PaymentId, expected: Version },

    /// The charge gateway could not be reached.
    #[error("Charge gateway error: {0}")]
    Gateway(String),

    /// A stored row could not be mapped back to a payment.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for payment operations.
pub type Result<T> = std::result::Result<T, PaymentError>;
