//! Inventory service: the stock ledger and everything that mutates it.
//!
//! Stock moves through three conditional operations on a single row:
//! reserve, release and confirm. The [`ReservationGateway`] is the
//! synchronous entry point used by the order service; the
//! [`PaymentOutcomeHandler`] finalizes or rolls back reservations when the
//! payment result arrives on the bus.

pub mod error;
pub mod gateway;
pub mod handlers;
pub mod ledger;
pub mod memory;
pub mod model;
pub mod postgres;

pub use error::{GatewayError, LedgerError};
pub use gateway::{ReservationGateway, ReserveStockResponse};
pub use handlers::PaymentOutcomeHandler;
pub use ledger::StockLedger;
pub use memory::InMemoryStockLedger;
pub use model::{StockLevel, StockRecord};
pub use postgres::PostgresStockLedger;

/// Consumer group of the inventory service.
pub const CONSUMER_GROUP: &str = "inventory-service";
