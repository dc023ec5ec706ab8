//! Consumer-side duplicate detection.
//!
//! The bus delivers at least once. Handlers whose side effects are not
//! idempotent claim a key per logical event before applying it.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::error::Result;

#[async_trait]
pub trait ProcessedMessages: Send + Sync {
    /// Records `key` for `group`. Returns false if it was already recorded.
    async fn try_claim(&self, group: &str, key: &str) -> Result<bool>;

    /// Forgets a claim so the event can be applied again.
    async fn release(&self, group: &str, key: &str) -> Result<()>;
}

#[derive(Clone, Default)]
pub struct InMemoryProcessedMessages {
    claims: Arc<RwLock<HashSet<(String, String)>>>,
}

impl InMemoryProcessedMessages {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.claims.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.claims.read().await.is_empty()
    }
}

#[async_trait]
impl ProcessedMessages for InMemoryProcessedMessages {
    async fn try_claim(&self, group: &str, key: &str) -> Result<bool> {
        Ok(self
            .claims
            .write()
            .await
            .insert((group.to_string(), key.to_string())))
    }

    async fn release(&self, group: &str, key: &str) -> Result<()> {
        self.claims
            .write()
            .await
            .remove(&(group.to_string(), key.to_string()));
        Ok(())
    }
}

/// PostgreSQL-backed claims in `processed_messages`.
#[derive(Clone)]
pub struct PostgresProcessedMessages {
    pool: PgPool,
}

impl PostgresProcessedMessages {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedMessages for PostgresProcessedMessages {
    async fn try_claim(&self, group: &str, key: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_messages (consumer_group, message_key, processed_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (consumer_group, message_key) DO NOTHING
            "#,
        )
        .bind(group)
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, group: &str, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM processed_messages WHERE consumer_group = $1 AND message_key = $2")
            .bind(group)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_claim_is_rejected() {
        let store = InMemoryProcessedMessages::new();
        assert!(store.try_claim("inventory-service", "k1").await.unwrap());
        assert!(!store.try_claim("inventory-service", "k1").await.unwrap());
        assert!(store.try_claim("order-service", "k1").await.unwrap());
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn released_claim_can_be_taken_again() {
        let store = InMemoryProcessedMessages::new();
        assert!(store.try_claim("g", "k").await.unwrap());
        store.release("g", "k").await.unwrap();
        assert!(store.try_claim("g", "k").await.unwrap());
    }
}
