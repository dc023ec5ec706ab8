use async_trait::async_trait;
use common::Page;

use crate::error::Result;
use crate::model::{FailedEvent, FailedEventId, FailedEventStatus, NewFailedEvent};

/// Durable storage for dead-lettered events.
#[async_trait]
pub trait FailedEventStore: Send + Sync {
    /// Persists a new event in status FAILED and returns it with its id.
    async fn insert(&self, event: NewFailedEvent) -> Result<FailedEvent>;

    async fn get(&self, id: FailedEventId) -> Result<Option<FailedEvent>>;

    /// Writes `event` if the stored version still equals `event.version`.
    ///
    /// Returns the row with its new version, or
    /// [`crate::DeadLetterError::ConcurrencyConflict`].
    async fn update(&self, event: &FailedEvent) -> Result<FailedEvent>;

    /// Lists a group's events in any of `statuses`, newest first.
    async fn list(
        &self,
        consumer_group: &str,
        statuses: &[FailedEventStatus],
        page: Page,
    ) -> Result<Vec<FailedEvent>>;

    async fn count(&self, consumer_group: &str, status: FailedEventStatus) -> Result<u64>;
}
