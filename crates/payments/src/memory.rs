use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::RwLock;

use crate::error::{PaymentError, Result};
use crate::model::Payment;
use crate::repository::PaymentRepository;

/// In-memory payment repository keyed by order id.
#[derive(Clone, Default)]
pub struct InMemoryPaymentRepository {
    payments: Arc<RwLock<HashMap<OrderId, Payment>>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn payment_count(&self) -> usize {
        self.payments.read().await.len()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert(&self, payment: &Payment) -> Result<Payment> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.order_id) {
            return Err(PaymentError::DuplicateOrder(payment.order_id));
        }
        payments.insert(payment.order_id, payment.clone());
        Ok(payment.clone())
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self.payments.read().await.get(&order_id).cloned())
    }

    async fn update(&self, payment: &Payment) -> Result<Payment> {
        let mut payments = self.payments.write().await;
        let stored = payments
            .get_mut(&payment.order_id)
            .filter(|stored| stored.id == payment.id)
            .ok_or(PaymentError::NotFound(payment.order_id))?;

        if stored.version != payment.version {
            return Err(PaymentError::ConcurrencyConflict {
                id: payment.id,
                expected: payment.version,
            });
        }

        let mut updated = payment.clone();
        updated.version = payment.version.next();
        *stored = updated.clone();
        Ok(updated)
    }
}
