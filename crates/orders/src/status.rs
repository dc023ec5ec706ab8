//! Order status machine.

use serde::{Deserialize, Serialize};

/// The status of an order in the saga.
///
/// ```text
/// Pending ──► InventoryReserved ──┬──► PaymentCompleted ──► Shipped ──► Delivered
///    │               │            └──► PaymentFailed
///    └───────────────┴──────────────────► Cancelled
/// ```
///
/// `PaymentPending`, `Shipped` and `Delivered` are set by fulfillment
/// collaborators outside this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    InventoryReserved,
    PaymentPending,
    PaymentCompleted,
    PaymentFailed,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Returns true if every line may still be marked as reserved.
    pub fn can_reserve(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if a payment outcome may be recorded in this status.
    pub fn can_record_payment(&self) -> bool {
        matches!(self, OrderStatus::InventoryReserved | OrderStatus::PaymentPending)
    }

    /// Returns true if the user may cancel the order in this status.
    pub fn can_cancel(&self) -> bool {
        !matches!(
            self,
            OrderStatus::Shipped | OrderStatus::Delivered | OrderStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::InventoryReserved => "INVENTORY_RESERVED",
            OrderStatus::PaymentPending => "PAYMENT_PENDING",
            OrderStatus::PaymentCompleted => "PAYMENT_COMPLETED",
            OrderStatus::PaymentFailed => "PAYMENT_FAILED",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "INVENTORY_RESERVED" => Ok(OrderStatus::InventoryReserved),
            "PAYMENT_PENDING" => Ok(OrderStatus::PaymentPending),
            "PAYMENT_COMPLETED" => Ok(OrderStatus::PaymentCompleted),
            "PAYMENT_FAILED" => Ok(OrderStatus::PaymentFailed),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}
