//! Shared types for the order fulfillment services.

pub mod telemetry;
pub mod types;

pub use telemetry::{InMemoryTelemetry, MetricsTelemetry, NoopTelemetry, Telemetry};
pub use types::{Money, OrderId, OwnerId, Page, ProductId, Version};
