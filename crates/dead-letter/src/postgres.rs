use async_trait::async_trait;
use common::{Page, Version};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{DeadLetterError, Result};
use crate::model::{FailedEvent, FailedEventId, FailedEventStatus, NewFailedEvent};
use crate::store::FailedEventStore;

const COLUMNS: &str = "id, consumer_group, topic, event_key, payload, error_message, status, \
     retry_count, max_retries, version, created_at, updated_at, resolved_at";

/// PostgreSQL-backed failed-event store.
#[derive(Clone)]
pub struct PostgresFailedEventStore {
    pool: PgPool,
}

impl PostgresFailedEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: PgRow) -> Result<FailedEvent> {
        let status: String = row.try_get("status")?;
        Ok(FailedEvent {
            id: FailedEventId::new(row.try_get("id")?),
            consumer_group: row.try_get("consumer_group")?,
            topic: row.try_get("topic")?,
            event_key: row.try_get("event_key")?,
            payload: row.try_get("payload")?,
            error_message: row.try_get("error_message")?,
            status: status.parse().map_err(DeadLetterError::InvalidData)?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }
}

#[async_trait]
impl FailedEventStore for PostgresFailedEventStore {
    async fn insert(&self, event: NewFailedEvent) -> Result<FailedEvent> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO failed_events
                (consumer_group, topic, event_key, payload, error_message, status,
                 retry_count, max_retries, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, NOW(), NOW())
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&event.consumer_group)
        .bind(&event.topic)
        .bind(&event.event_key)
        .bind(&event.payload)
        .bind(&event.error_message)
        .bind(FailedEventStatus::Failed.as_str())
        .bind(event.max_retries)
        .bind(Version::first().as_i64())
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_event(row)
    }

    async fn get(&self, id: FailedEventId) -> Result<Option<FailedEvent>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM failed_events WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_event).transpose()
    }

    async fn update(&self, event: &FailedEvent) -> Result<FailedEvent> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE failed_events
            SET error_message = $3, status = $4, retry_count = $5, max_retries = $6,
                version = version + 1, updated_at = $7, resolved_at = $8
            WHERE id = $1 AND version = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(event.id.as_i64())
        .bind(event.version.as_i64())
        .bind(&event.error_message)
        .bind(event.status.as_str())
        .bind(event.retry_count)
        .bind(event.max_retries)
        .bind(event.updated_at)
        .bind(event.resolved_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_event(row),
            None if self.get(event.id).await?.is_some() => {
                Err(DeadLetterError::ConcurrencyConflict {
                    id: event.id,
                    expected: event.version,
                })
            }
            None => Err(DeadLetterError::NotFound(event.id)),
        }
    }

    async fn list(
        &self,
        consumer_group: &str,
        statuses: &[FailedEventStatus],
        page: Page,
    ) -> Result<Vec<FailedEvent>> {
        let statuses: Vec<&str> = statuses.iter().map(FailedEventStatus::as_str).collect();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM failed_events
            WHERE consumer_group = $1 AND status = ANY($2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(consumer_group)
        .bind(&statuses)
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn count(&self, consumer_group: &str, status: FailedEventStatus) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM failed_events WHERE consumer_group = $1 AND status = $2",
        )
        .bind(consumer_group)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count as u64)
    }
}
