//! Dead-letter persistence and operator replay.
//!
//! Messages that exhaust a consumer's retry policy arrive on the topic's
//! dead-letter channel. The [`DeadLetterHandler`] stores them as
//! [`FailedEvent`]s; the [`FailedEventService`] lets an operator list,
//! replay or discard them. Replay goes through the [`ReplayRegistry`], which
//! maps each topic to the same handler the live consumer uses.

pub mod error;
pub mod handler;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod registry;
pub mod service;
pub mod store;

pub use error::{DeadLetterError, Result};
pub use handler::DeadLetterHandler;
pub use memory::InMemoryFailedEventStore;
pub use model::{FailedEvent, FailedEventId, FailedEventStatus, NewFailedEvent};
pub use postgres::PostgresFailedEventStore;
pub use registry::ReplayRegistry;
pub use service::{FailedEventService, ReplayOutcome};
pub use store::FailedEventStore;
