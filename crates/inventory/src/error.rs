use common::ProductId;
use thiserror::Error;

/// Errors raised by the stock ledger.
///
/// Insufficient stock is not an error: the operations return `false`.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Amount must be positive, got {0}")]
    InvalidAmount(u32),

    #[error("Stock record already exists for {0}")]
    AlreadyExists(ProductId),

    #[error("Quantity must not be negative, got {0}")]
    InvalidQuantity(i64),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors returned by the reservation gateway to its callers.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Product not found: {0}")]
    NotFound(ProductId),

    #[error("Quantity must be positive")]
    InvalidQuantity,

    /// Generic failure; the cause is logged on the inventory side.
    #[error("Internal inventory error")]
    Internal,
}
