//! Payment service.
//!
//! [`PaymentProcessor`] consumes `order-created`, charges the order total
//! through a [`ChargeGateway`] and publishes `payment-completed` or
//! `payment-failed`. A payment is keyed by its order id, so a redelivered
//! `order-created` never charges twice.

pub mod error;
pub mod gateway;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod processor;
pub mod repository;

pub use error::{PaymentError, Result};
pub use gateway::{ChargeGateway, ChargeOutcome, InMemoryChargeGateway, SimulatedChargeGateway};
pub use memory::InMemoryPaymentRepository;
pub use model::{Payment, PaymentId, PaymentStatus};
pub use postgres::PostgresPaymentRepository;
pub use processor::PaymentProcessor;
pub use repository::PaymentRepository;

/// Consumer group of the payment service on the event bus.
pub const CONSUMER_GROUP: &str = "payment-service";
