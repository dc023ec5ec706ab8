//! Order service: the saga coordinator and its collaborators.
//!
//! [`OrderSagaCoordinator`] creates orders, reserves stock line by line
//! through a [`ReservationClient`] and publishes `order-created` once every
//! line is held. Payment outcomes flow back in as bus events and move the
//! order forward; they never move it backwards.

pub mod breaker;
pub mod client;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod repository;
pub mod status;

pub use breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakingReservationClient, CircuitState, Permit,
};
pub use client::{InProcessReservationClient, ReservationClient};
pub use coordinator::OrderSagaCoordinator;
pub use error::{OrderError, ReservationError, Result};
pub use memory::InMemoryOrderRepository;
pub use model::{CreateOrder, NewOrderLine, Order, OrderLine};
pub use postgres::PostgresOrderRepository;
pub use repository::OrderRepository;
pub use status::OrderStatus;

/// Consumer group of the order service on the event bus.
pub const CONSUMER_GROUP: &str = "order-service";
