//! Saga event payloads and topic-based dispatch.

use common::{Money, OrderId, OwnerId, ProductId};
use serde::{Deserialize, Serialize};

use crate::envelope::MessageEnvelope;
use crate::error::HandlerError;
use crate::topics;

/// A priced line of an order, as carried by `order-created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Product and quantity, as carried by the payment outcome events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

impl From<&OrderLineItem> for StockItem {
    fn from(line: &OrderLineItem) -> Self {
        Self {
            product_id: line.product_id.clone(),
            quantity: line.quantity,
        }
    }
}

/// Published by the order service once every line is reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub owner: OwnerId,
    pub total_amount: Money,
    pub items: Vec<OrderLineItem>,
}

/// Published by the payment service after an approved charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub order_id: OrderId,
    pub amount: Money,
    pub transaction_id: String,
    pub items: Vec<StockItem>,
}

/// Published by the payment service after a declined charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub order_id: OrderId,
    pub amount: Money,
    pub reason: String,
    pub items: Vec<StockItem>,
}

/// Published by the inventory service for each reserved line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryReserved {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Every event kind exchanged by the saga, tagged by its topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaMessage {
    OrderCreated(OrderCreated),
    PaymentCompleted(PaymentCompleted),
    PaymentFailed(PaymentFailed),
    InventoryReserved(InventoryReserved),
}

impl SagaMessage {
    /// Returns the topic this event is published to.
    pub fn topic(&self) -> &'static str {
        match self {
            SagaMessage::OrderCreated(_) => topics::ORDER_CREATED,
            SagaMessage::PaymentCompleted(_) => topics::PAYMENT_COMPLETED,
            SagaMessage::PaymentFailed(_) => topics::PAYMENT_FAILED,
            SagaMessage::InventoryReserved(_) => topics::INVENTORY_RESERVED,
        }
    }

    /// Returns the order the event is about. Used as the message key.
    pub fn order_id(&self) -> OrderId {
        match self {
            SagaMessage::OrderCreated(e) => e.order_id,
            SagaMessage::PaymentCompleted(e) => e.order_id,
            SagaMessage::PaymentFailed(e) => e.order_id,
            SagaMessage::InventoryReserved(e) => e.order_id,
        }
    }

    /// Decodes a payload according to the schema registered for `topic`.
    ///
    /// Dead-letter topics decode as their origin topic.
    pub fn decode(topic: &str, payload: &serde_json::Value) -> Result<Self, HandlerError> {
        let origin = topics::origin(topic);
        let decode_err = |source| HandlerError::Decode {
            topic: origin.to_string(),
            source,
        };
        let message = match origin {
            topics::ORDER_CREATED => {
                SagaMessage::OrderCreated(serde_json::from_value(payload.clone()).map_err(decode_err)?)
            }
            topics::PAYMENT_COMPLETED => SagaMessage::PaymentCompleted(
                serde_json::from_value(payload.clone()).map_err(decode_err)?,
            ),
            topics::PAYMENT_FAILED => {
                SagaMessage::PaymentFailed(serde_json::from_value(payload.clone()).map_err(decode_err)?)
            }
            topics::INVENTORY_RESERVED => SagaMessage::InventoryReserved(
                serde_json::from_value(payload.clone()).map_err(decode_err)?,
            ),
            other => return Err(HandlerError::UnknownTopic(other.to_string())),
        };
        Ok(message)
    }

    /// Serializes the event payload.
    pub fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            SagaMessage::OrderCreated(e) => serde_json::to_value(e),
            SagaMessage::PaymentCompleted(e) => serde_json::to_value(e),
            SagaMessage::PaymentFailed(e) => serde_json::to_value(e),
            SagaMessage::InventoryReserved(e) => serde_json::to_value(e),
        }
    }

    /// Wraps the event in an envelope keyed by its order id.
    pub fn to_envelope(&self) -> Result<MessageEnvelope, serde_json::Error> {
        Ok(MessageEnvelope {
            message_id: Default::default(),
            topic: self.topic().to_string(),
            key: self.order_id().to_string(),
            payload: self.payload()?,
            headers: Default::default(),
            timestamp: chrono::Utc::now(),
        })
    }
}

impl From<OrderCreated> for SagaMessage {
    fn from(e: OrderCreated) -> Self {
        SagaMessage::OrderCreated(e)
    }
}

impl From<PaymentCompleted> for SagaMessage {
    fn from(e: PaymentCompleted) -> Self {
        SagaMessage::PaymentCompleted(e)
    }
}

impl From<PaymentFailed> for SagaMessage {
    fn from(e: PaymentFailed) -> Self {
        SagaMessage::PaymentFailed(e)
    }
}

impl From<InventoryReserved> for SagaMessage {
    fn from(e: InventoryReserved) -> Self {
        SagaMessage::InventoryReserved(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment_failed() -> SagaMessage {
        SagaMessage::PaymentFailed(PaymentFailed {
            order_id: OrderId::new(),
            amount: Money::from_cents(5000),
            reason: "Card declined".to_string(),
            items: vec![StockItem {
                product_id: ProductId::new("SKU-1"),
                quantity: 2,
            }],
        })
    }

    #[test]
    fn envelope_is_keyed_by_order() {
        let message = payment_failed();
        let envelope = message.to_envelope().unwrap();
        assert_eq!(envelope.topic, topics::PAYMENT_FAILED);
        assert_eq!(envelope.key, message.order_id().to_string());
        assert_eq!(envelope.payload["reason"], "Card declined");
    }

    #[test]
    fn decode_selects_variant_by_topic() {
        let message = payment_failed();
        let payload = message.payload().unwrap();
        let decoded = SagaMessage::decode(topics::PAYMENT_FAILED, &payload).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn decode_accepts_dead_letter_topic() {
        let message = payment_failed();
        let payload = message.payload().unwrap();
        let decoded = SagaMessage::decode("payment-failed-dlt", &payload).unwrap();
        assert_eq!(decoded.topic(), topics::PAYMENT_FAILED);
    }

    #[test]
    fn decode_rejects_unknown_topic() {
        let err = SagaMessage::decode("shipment-created", &serde_json::json!({})).unwrap_err();
        assert!(matches!(err, HandlerError::UnknownTopic(t) if t == "shipment-created"));
    }

    #[test]
    fn decode_rejects_mismatched_payload() {
        let payload = payment_failed().payload().unwrap();
        let err = SagaMessage::decode(topics::INVENTORY_RESERVED, &payload).unwrap_err();
        assert!(matches!(err, HandlerError::Decode { .. }));
    }
}
