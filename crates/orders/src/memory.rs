use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::{OrderId, OwnerId, Page};
use tokio::sync::RwLock;

use crate::error::{OrderError, Result};
use crate::model::Order;
use crate::repository::OrderRepository;

/// In-memory order repository for testing and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    fail_on_write: Arc<AtomicBool>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures writes to fail, simulating an unreachable database.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(OrderError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> Result<Order> {
        self.check_writable()?;
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(OrderError::ConcurrencyConflict {
                id: order.id,
                expected: order.version,
            });
        }
        orders.insert(order.id, order.clone());
        Ok(order.clone())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn update(&self, order: &Order) -> Result<Order> {
        self.check_writable()?;
        let mut orders = self.orders.write().await;
        let stored = orders
            .get_mut(&order.id)
            .ok_or(OrderError::NotFound(order.id))?;

        if stored.version != order.version {
            return Err(OrderError::ConcurrencyConflict {
                id: order.id,
                expected: order.version,
            });
        }

        let mut updated = order.clone();
        updated.version = order.version.next();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list_by_owner(&self, owner: &OwnerId, page: Page) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut owned: Vec<_> = orders
            .values()
            .filter(|o| o.owner == *owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.id.as_uuid().cmp(&a.id.as_uuid()))
        });

        Ok(owned
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect())
    }
}
