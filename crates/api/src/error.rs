//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dead_letter::DeadLetterError;
use inventory::GatewayError;
use orders::{OrderError, ReservationError};
use payments::PaymentError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The caller identity header is missing.
    Unauthorized(String),
    /// Order service error.
    Order(OrderError),
    /// Stock check error.
    Inventory(GatewayError),
    /// Payment lookup error.
    Payment(PaymentError),
    /// Operator replay error.
    DeadLetter(DeadLetterError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Order(err) => order_error_to_response(err),
            ApiError::Inventory(err) => gateway_error_to_response(err),
            ApiError::Payment(err) => payment_error_to_response(err),
            ApiError::DeadLetter(err) => dead_letter_error_to_response(err),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn order_error_to_response(err: OrderError) -> (StatusCode, String) {
    let status = match &err {
        OrderError::Validation(_) => StatusCode::BAD_REQUEST,
        OrderError::NotFound(_) => StatusCode::NOT_FOUND,
        OrderError::NotOwner(_) => StatusCode::FORBIDDEN,
        OrderError::InvalidState { .. }
        | OrderError::InsufficientStock(_)
        | OrderError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
        OrderError::Reservation(ReservationError::Unavailable) => StatusCode::SERVICE_UNAVAILABLE,
        OrderError::Reservation(ReservationError::Gateway(_))
        | OrderError::InvalidData(_)
        | OrderError::Interrupted(_)
        | OrderError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn gateway_error_to_response(err: GatewayError) -> (StatusCode, String) {
    let status = match &err {
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::InvalidQuantity => StatusCode::BAD_REQUEST,
        GatewayError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn payment_error_to_response(err: PaymentError) -> (StatusCode, String) {
    let status = match &err {
        PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
        PaymentError::DuplicateOrder(_) | PaymentError::ConcurrencyConflict { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn dead_letter_error_to_response(err: DeadLetterError) -> (StatusCode, String) {
    let status = match &err {
        DeadLetterError::NotFound(_) => StatusCode::NOT_FOUND,
        DeadLetterError::InvalidStatus { .. } | DeadLetterError::ConcurrencyConflict { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        ApiError::Inventory(err)
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        ApiError::Payment(err)
    }
}

impl From<DeadLetterError> for ApiError {
    fn from(err: DeadLetterError) -> Self {
        ApiError::DeadLetter(err)
    }
}
