use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use common::Page;
use tokio::sync::RwLock;

use crate::error::{DeadLetterError, Result};
use crate::model::{FailedEvent, FailedEventId, FailedEventStatus, NewFailedEvent};
use crate::store::FailedEventStore;

#[derive(Default)]
struct State {
    events: Vec<FailedEvent>,
    next_id: i64,
}

/// In-memory failed-event store for testing and single-process runs.
#[derive(Clone, Default)]
pub struct InMemoryFailedEventStore {
    state: Arc<RwLock<State>>,
    fail_on_insert: Arc<AtomicBool>,
}

impl InMemoryFailedEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures inserts to fail, simulating an unreachable database.
    pub fn set_fail_on_insert(&self, fail: bool) {
        self.fail_on_insert.store(fail, Ordering::SeqCst);
    }

    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    pub async fn all(&self) -> Vec<FailedEvent> {
        self.state.read().await.events.clone()
    }
}

#[async_trait]
impl FailedEventStore for InMemoryFailedEventStore {
    async fn insert(&self, event: NewFailedEvent) -> Result<FailedEvent> {
        if self.fail_on_insert.load(Ordering::SeqCst) {
            return Err(DeadLetterError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut state = self.state.write().await;
        state.next_id += 1;
        let stored = event.into_failed_event(FailedEventId::new(state.next_id));
        state.events.push(stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: FailedEventId) -> Result<Option<FailedEvent>> {
        let state = self.state.read().await;
        Ok(state.events.iter().find(|e| e.id == id).cloned())
    }

    async fn update(&self, event: &FailedEvent) -> Result<FailedEvent> {
        let mut state = self.state.write().await;
        let stored = state
            .events
            .iter_mut()
            .find(|e| e.id == event.id)
            .ok_or(DeadLetterError::NotFound(event.id))?;

        if stored.version != event.version {
            return Err(DeadLetterError::ConcurrencyConflict {
                id: event.id,
                expected: event.version,
            });
        }

        let mut updated = event.clone();
        updated.version = event.version.next();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn list(
        &self,
        consumer_group: &str,
        statuses: &[FailedEventStatus],
        page: Page,
    ) -> Result<Vec<FailedEvent>> {
        let state = self.state.read().await;
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|e| e.consumer_group == consumer_group && statuses.contains(&e.status))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(events
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect())
    }

    async fn count(&self, consumer_group: &str, status: FailedEventStatus) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.consumer_group == consumer_group && e.status == status)
            .count() as u64)
    }
}
