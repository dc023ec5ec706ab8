//! HTTP handlers, one module per resource.

pub mod health;
pub mod inventory;
pub mod metrics;
pub mod ops;
pub mod orders;
