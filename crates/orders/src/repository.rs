use async_trait::async_trait;
use common::{OrderId, OwnerId, Page};

use crate::error::Result;
use crate::model::Order;

/// Persistence for orders and their lines.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Stores a new order with its lines.
    async fn insert(&self, order: &Order) -> Result<Order>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Writes status, address and line flags if the stored version still
    /// equals `order.version`, and returns the order at the next version.
    ///
    /// Fails with `ConcurrencyConflict` when another writer got there first.
    async fn update(&self, order: &Order) -> Result<Order>;

    /// Returns the owner's orders, newest first.
    async fn list_by_owner(&self, owner: &OwnerId, page: Page) -> Result<Vec<Order>>;
}
