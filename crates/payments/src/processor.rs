//! Charges created orders exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, Telemetry};
use event_bus::{
    EventBus, EventBusExt, HandlerError, MessageHandler, OrderCreated, PaymentCompleted,
    PaymentFailed, SagaMessage, StockItem,
};

use crate::error::{PaymentError, Result};
use crate::gateway::{ChargeGateway, ChargeOutcome};
use crate::model::Payment;
use crate::repository::PaymentRepository;

pub struct PaymentProcessor {
    repository: Arc<dyn PaymentRepository>,
    gateway: Arc<dyn ChargeGateway>,
    bus: Arc<dyn EventBus>,
    telemetry: Arc<dyn Telemetry>,
}

impl PaymentProcessor {
    pub fn new(
        repository: Arc<dyn PaymentRepository>,
        gateway: Arc<dyn ChargeGateway>,
        bus: Arc<dyn EventBus>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            repository,
            gateway,
            bus,
            telemetry,
        }
    }

    pub async fn get_payment_by_order(&self, order_id: OrderId) -> Result<Payment> {
        self.repository
            .get_by_order(order_id)
            .await?
            .ok_or(PaymentError::NotFound(order_id))
    }

    /// Charges the order unless it already has a settled payment.
    ///
    /// Returns `None` for an idempotent skip. A payment left in `PENDING`
    /// or `PROCESSING` by an interrupted attempt is charged again under the
    /// same payment id.
    #[tracing::instrument(skip_all, fields(order_id = %event.order_id, amount = %event.total_amount))]
    pub async fn process(&self, event: &OrderCreated) -> Result<Option<Payment>> {
        let payment = match self.repository.get_by_order(event.order_id).await? {
            Some(existing) if existing.status.is_final() => {
                self.skip(&existing);
                return Ok(None);
            }
            Some(existing) => {
                tracing::warn!(
                    payment_id = %existing.id,
                    status = %existing.status,
                    "resuming interrupted payment"
                );
                existing
            }
            None => {
                let payment = Payment::processing(
                    event.order_id,
                    event.owner.clone(),
                    event.total_amount,
                );
                match self.repository.insert(&payment).await {
                    Ok(payment) => payment,
                    Err(PaymentError::DuplicateOrder(_)) => {
                        tracing::info!("payment created concurrently, skipping");
                        self.telemetry
                            .increment("payments_idempotent_skip_total", &[]);
                        return Ok(None);
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        let outcome = self
            .gateway
            .charge(payment.id, payment.order_id, &payment.owner, payment.amount)
            .await?;

        let mut settled = payment;
        match &outcome {
            ChargeOutcome::Approved { transaction_id } => settled.complete(transaction_id),
            ChargeOutcome::Declined { reason } => settled.fail(reason),
        }
        let settled = self.repository.update(&settled).await?;

        let items: Vec<StockItem> = event.items.iter().map(StockItem::from).collect();
        let message = match &outcome {
            ChargeOutcome::Approved { transaction_id } => {
                tracing::info!(payment_id = %settled.id, %transaction_id, "payment completed");
                self.telemetry.increment("payments_completed_total", &[]);
                SagaMessage::PaymentCompleted(PaymentCompleted {
                    order_id: settled.order_id,
                    amount: settled.amount,
                    transaction_id: transaction_id.clone(),
                    items,
                })
            }
            ChargeOutcome::Declined { reason } => {
                tracing::warn!(payment_id = %settled.id, %reason, "payment declined");
                self.telemetry
                    .increment("payments_failed_total", &[("reason", reason.as_str())]);
                SagaMessage::PaymentFailed(PaymentFailed {
                    order_id: settled.order_id,
                    amount: settled.amount,
                    reason: reason.clone(),
                    items,
                })
            }
        };

        if let Err(err) = self.bus.publish_event(&message).await {
            tracing::error!(
                payment_id = %settled.id,
                topic = message.topic(),
                error = %err,
                "CRITICAL: payment committed but outcome not published"
            );
            self.telemetry
                .increment("publish_failures_total", &[("topic", message.topic())]);
        }

        Ok(Some(settled))
    }

    fn skip(&self, existing: &Payment) {
        tracing::info!(
            payment_id = %existing.id,
            status = %existing.status,
            "order already charged, skipping"
        );
        self.telemetry
            .increment("payments_idempotent_skip_total", &[]);
    }
}

#[async_trait]
impl MessageHandler for PaymentProcessor {
    async fn handle(&self, message: &SagaMessage) -> std::result::Result<(), HandlerError> {
        match message {
            SagaMessage::OrderCreated(event) => self
                .process(event)
                .await
                .map(|_| ())
                .map_err(HandlerError::processing),
            other => Err(HandlerError::Unsupported(other.topic().to_string())),
        }
    }
}
