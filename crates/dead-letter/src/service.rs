//! Operator actions on a service's failed events.

use std::sync::Arc;

use common::{Page, Telemetry};

use crate::error::{DeadLetterError, Result};
use crate::model::{FailedEvent, FailedEventId, FailedEventStatus};
use crate::registry::ReplayRegistry;
use crate::store::FailedEventStore;

/// Result of a manual replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The handler accepted the event; it is now RESOLVED.
    Resolved,
    /// The handler failed again; the event is back in FAILED.
    Failed { error: String },
    /// The replay budget is spent; nothing was attempted.
    RetriesExhausted,
}

impl ReplayOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, ReplayOutcome::Resolved)
    }
}

pub struct FailedEventService {
    group: String,
    store: Arc<dyn FailedEventStore>,
    registry: ReplayRegistry,
    telemetry: Arc<dyn Telemetry>,
}

impl FailedEventService {
    pub fn new(
        group: impl Into<String>,
        store: Arc<dyn FailedEventStore>,
        registry: ReplayRegistry,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            group: group.into(),
            store,
            registry,
            telemetry,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// FAILED and RETRYING events, newest first.
    pub async fn list_unresolved(&self, page: Page) -> Result<Vec<FailedEvent>> {
        self.store
            .list(
                &self.group,
                &[FailedEventStatus::Failed, FailedEventStatus::Retrying],
                page,
            )
            .await
    }

    /// FAILED events only, newest first.
    pub async fn list_failed(&self, page: Page) -> Result<Vec<FailedEvent>> {
        self.store
            .list(&self.group, &[FailedEventStatus::Failed], page)
            .await
    }

    pub async fn failed_count(&self) -> Result<u64> {
        self.store
            .count(&self.group, FailedEventStatus::Failed)
            .await
    }

    pub async fn get(&self, id: FailedEventId) -> Result<FailedEvent> {
        self.store
            .get(id)
            .await?
            .filter(|e| e.consumer_group == self.group)
            .ok_or(DeadLetterError::NotFound(id))
    }

    /// Replays a failed event through the live handler for its topic.
    ///
    /// The retry count is incremented before dispatch and stays incremented
    /// whatever the outcome.
    #[tracing::instrument(skip(self), fields(group = %self.group))]
    pub async fn retry(&self, id: FailedEventId) -> Result<ReplayOutcome> {
        let mut event = self.get(id).await?;
        if !event.status.is_unresolved() {
            return Err(DeadLetterError::InvalidStatus {
                id,
                status: event.status,
            });
        }
        if event.retries_exhausted() {
            tracing::warn!(
                %id,
                retry_count = event.retry_count,
                max_retries = event.max_retries,
                "manual retry rejected, budget spent"
            );
            return Ok(ReplayOutcome::RetriesExhausted);
        }

        event.begin_retry();
        let mut event = self.store.update(&event).await?;
        tracing::info!(%id, topic = %event.topic, attempt = event.retry_count, "replaying failed event");

        let outcome = match self.registry.dispatch(&event.topic, &event.payload).await {
            Ok(()) => {
                event.resolve();
                ReplayOutcome::Resolved
            }
            Err(err) => {
                let error = err.to_string();
                event.fail(error.clone());
                ReplayOutcome::Failed { error }
            }
        };
        self.store.update(&event).await?;

        let label = if outcome.succeeded() { "resolved" } else { "failed" };
        self.telemetry.increment(
            "dead_letter_replays_total",
            &[("group", self.group.as_str()), ("outcome", label)],
        );
        tracing::info!(%id, outcome = label, "replay finished");
        Ok(outcome)
    }

    /// Closes an event without processing it.
    ///
    /// Already closed events are returned unchanged.
    #[tracing::instrument(skip(self), fields(group = %self.group))]
    pub async fn discard(&self, id: FailedEventId) -> Result<FailedEvent> {
        let mut event = self.get(id).await?;
        if !event.status.is_unresolved() {
            return Ok(event);
        }

        event.discard();
        let event = self.store.update(&event).await?;
        tracing::info!(%id, "failed event discarded");
        Ok(event)
    }
}
