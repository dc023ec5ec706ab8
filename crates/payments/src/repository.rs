use async_trait::async_trait;
use common::OrderId;

use crate::error::Result;
use crate::model::Payment;

/// Persistence for payments, unique per order.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Stores a new payment. Fails with `DuplicateOrder` if the order
    /// already has one.
    async fn insert(&self, payment: &Payment) -> Result<Payment>;

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Writes the payment if the stored version still equals
    /// `payment.version`, and returns it at the next version.
    async fn update(&self, payment: &Payment) -> Result<Payment>;
}
