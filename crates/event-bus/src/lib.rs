//! Event bus for the order fulfillment saga.
//!
//! Services exchange [`SagaMessage`]s over named topics. Every consumer
//! runs behind a bounded [`RetryPolicy`]; messages that exhaust it are
//! forwarded to the topic's dead-letter channel (see [`topics::dlt`]).

pub mod bus;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod memory;
pub mod retry;
pub mod topics;

pub use bus::{EventBus, EventBusExt, Subscription};
pub use consumer::{Consumer, Delivery, MessageHandler};
pub use envelope::{MessageEnvelope, MessageEnvelopeBuilder, MessageId};
pub use error::{BusError, HandlerError, Result};
pub use events::{
    InventoryReserved, OrderCreated, OrderLineItem, PaymentCompleted, PaymentFailed, SagaMessage,
    StockItem,
};
pub use idempotency::{InMemoryProcessedMessages, PostgresProcessedMessages, ProcessedMessages};
pub use memory::InMemoryEventBus;
pub use retry::RetryPolicy;
