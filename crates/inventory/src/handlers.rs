//! Finalizes or rolls back reservations once the payment outcome is known.

use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, Telemetry};
use event_bus::{HandlerError, MessageHandler, ProcessedMessages, SagaMessage, StockItem, topics};

use crate::CONSUMER_GROUP;
use crate::ledger::StockLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Confirm,
    Release,
}

impl Settlement {
    fn topic(&self) -> &'static str {
        match self {
            Settlement::Confirm => topics::PAYMENT_COMPLETED,
            Settlement::Release => topics::PAYMENT_FAILED,
        }
    }
}

/// Consumes `payment-completed` and `payment-failed`.
///
/// Each item is claimed in the processed-message store before the ledger is
/// touched, so a redelivered event does not deduct or release twice. A claim
/// is given back when the ledger call errors, letting the retry apply it.
pub struct PaymentOutcomeHandler {
    ledger: Arc<dyn StockLedger>,
    processed: Arc<dyn ProcessedMessages>,
    telemetry: Arc<dyn Telemetry>,
}

impl PaymentOutcomeHandler {
    pub fn new(
        ledger: Arc<dyn StockLedger>,
        processed: Arc<dyn ProcessedMessages>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            ledger,
            processed,
            telemetry,
        }
    }

    async fn settle(
        &self,
        settlement: Settlement,
        order_id: OrderId,
        items: &[StockItem],
    ) -> Result<(), HandlerError> {
        for (index, item) in items.iter().enumerate() {
            let key = format!(
                "{}:{}:{}:{}",
                settlement.topic(),
                order_id,
                index,
                item.product_id
            );
            let claimed = self
                .processed
                .try_claim(CONSUMER_GROUP, &key)
                .await
                .map_err(HandlerError::processing)?;
            if !claimed {
                tracing::info!(%key, "duplicate delivery ignored");
                self.telemetry
                    .increment("inventory_duplicate_events_total", &[("topic", settlement.topic())]);
                continue;
            }

            let result = match settlement {
                Settlement::Confirm => {
                    self.ledger
                        .confirm_deduction(&item.product_id, item.quantity)
                        .await
                }
                Settlement::Release => self.ledger.release(&item.product_id, item.quantity).await,
            };

            match result {
                Ok(true) => {
                    tracing::info!(
                        %order_id,
                        product_id = %item.product_id,
                        quantity = item.quantity,
                        ?settlement,
                        "reservation settled"
                    );
                    let name = match settlement {
                        Settlement::Confirm => "inventory_deductions_total",
                        Settlement::Release => "inventory_releases_total",
                    };
                    self.telemetry.increment(name, &[]);
                }
                Ok(false) => {
                    // Retrying cannot make a missing reservation appear.
                    tracing::error!(
                        %order_id,
                        product_id = %item.product_id,
                        quantity = item.quantity,
                        ?settlement,
                        "no matching reservation, stock left unchanged"
                    );
                    self.telemetry.increment(
                        "inventory_settlement_mismatch_total",
                        &[("topic", settlement.topic())],
                    );
                }
                Err(err) => {
                    if let Err(release_err) = self.processed.release(CONSUMER_GROUP, &key).await {
                        tracing::error!(%key, error = %release_err, "failed to give back idempotency claim");
                    }
                    return Err(HandlerError::processing(err));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for PaymentOutcomeHandler {
    #[tracing::instrument(skip_all, fields(topic = message.topic(), order_id = %message.order_id()))]
    async fn handle(&self, message: &SagaMessage) -> Result<(), HandlerError> {
        match message {
            SagaMessage::PaymentCompleted(event) => {
                self.settle(Settlement::Confirm, event.order_id, &event.items)
                    .await
            }
            SagaMessage::PaymentFailed(event) => {
                self.settle(Settlement::Release, event.order_id, &event.items)
                    .await
            }
            other => Err(HandlerError::Unsupported(other.topic().to_string())),
        }
    }
}
