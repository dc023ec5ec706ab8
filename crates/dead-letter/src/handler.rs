use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use common::Telemetry;
use event_bus::{EventBus, MessageEnvelope, RetryPolicy, topics};
use tokio::task::JoinHandle;

use crate::error::{DeadLetterError, Result};
use crate::model::{FailedEvent, NewFailedEvent};
use crate::store::FailedEventStore;

pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Persists dead-lettered messages of one consumer group.
///
/// Every service that consumes a topic writes its exhausted messages to the
/// same `-dlt` channel; the handler keeps only those tagged with its own
/// group.
pub struct DeadLetterHandler {
    group: String,
    store: Arc<dyn FailedEventStore>,
    telemetry: Arc<dyn Telemetry>,
    persist_policy: RetryPolicy,
    max_retries: i32,
}

impl DeadLetterHandler {
    pub fn new(
        group: impl Into<String>,
        store: Arc<dyn FailedEventStore>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            group: group.into(),
            store,
            telemetry,
            persist_policy: RetryPolicy::three_attempts(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Sets the manual replay budget stored on new events.
    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the retry policy for writing to the store.
    pub fn with_persist_policy(mut self, policy: RetryPolicy) -> Self {
        self.persist_policy = policy;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Subscribes to the dead-letter channel of each topic.
    pub async fn spawn(
        self: Arc<Self>,
        bus: &dyn EventBus,
        origin_topics: &[&str],
    ) -> event_bus::Result<Vec<JoinHandle<()>>> {
        let dlt_group = format!("{}-dlt", self.group);
        let mut handles = Vec::new();
        for topic in origin_topics {
            let dlt = topics::dlt(topic);
            for mut subscription in bus.subscribe(&dlt, &dlt_group).await? {
                let handler = Arc::clone(&self);
                handles.push(tokio::spawn(async move {
                    while let Some(envelope) = subscription.recv().await {
                        handler.handle(&envelope).await;
                    }
                }));
            }
            tracing::info!(group = %self.group, topic = %dlt, "dead-letter handler started");
        }
        Ok(handles)
    }

    /// Stores one dead-letter message.
    ///
    /// Returns None when the message belongs to another group or could not
    /// be stored; the latter is logged with the full payload.
    #[tracing::instrument(skip(self, envelope), fields(group = %self.group, topic = %envelope.topic, key = %envelope.key))]
    pub async fn handle(&self, envelope: &MessageEnvelope) -> Option<FailedEvent> {
        if envelope.header(topics::HEADER_CONSUMER_GROUP) != Some(self.group.as_str()) {
            return None;
        }

        let origin = envelope
            .header(topics::HEADER_ORIGINAL_TOPIC)
            .unwrap_or_else(|| topics::origin(&envelope.topic))
            .to_string();
        let new_event = NewFailedEvent {
            consumer_group: self.group.clone(),
            topic: origin.clone(),
            event_key: envelope.key.clone(),
            payload: envelope.payload.clone(),
            error_message: envelope
                .header(topics::HEADER_EXCEPTION_MESSAGE)
                .unwrap_or("unknown error")
                .to_string(),
            max_retries: self.max_retries,
        };

        match self.persist(new_event).await {
            Ok(stored) => {
                tracing::warn!(id = %stored.id, error = %stored.error_message, "event dead-lettered");
                self.telemetry.increment(
                    "dead_letter_events_total",
                    &[("topic", origin.as_str()), ("group", self.group.as_str())],
                );
                Some(stored)
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    payload = %envelope.payload,
                    "CRITICAL: failed to persist dead-lettered event"
                );
                self.telemetry.increment(
                    "dead_letter_persist_failed_total",
                    &[("topic", origin.as_str()), ("group", self.group.as_str())],
                );
                None
            }
        }
    }

    async fn persist(&self, event: NewFailedEvent) -> Result<FailedEvent> {
        (|| async { self.store.insert(event.clone()).await })
            .retry(self.persist_policy.builder())
            .notify(|err: &DeadLetterError, delay: Duration| {
                tracing::warn!(error = %err, ?delay, "failed to persist dead-lettered event, retrying");
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use common::InMemoryTelemetry;

    use super::*;
    use crate::memory::InMemoryFailedEventStore;
    use crate::model::FailedEventStatus;

    fn dead_letter(group: &str) -> MessageEnvelope {
        MessageEnvelope::builder()
            .topic("payment-completed-dlt")
            .key("order-7")
            .payload_raw(serde_json::json!({ "order_id": "order-7" }))
            .header(topics::HEADER_ORIGINAL_TOPIC, "payment-completed")
            .header(topics::HEADER_CONSUMER_GROUP, group)
            .header(topics::HEADER_EXCEPTION_MESSAGE, "ledger unreachable")
            .try_build()
            .unwrap()
    }

    fn handler(store: &InMemoryFailedEventStore, telemetry: Arc<InMemoryTelemetry>) -> DeadLetterHandler {
        DeadLetterHandler::new("inventory-service", Arc::new(store.clone()), telemetry)
            .with_persist_policy(RetryPolicy::new(
                2,
                Duration::from_millis(1),
                2.0,
                Duration::from_millis(1),
            ))
    }

    #[tokio::test]
    async fn stores_failed_event_for_own_group() {
        let store = InMemoryFailedEventStore::new();
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let handler = handler(&store, telemetry.clone());

        let stored = handler.handle(&dead_letter("inventory-service")).await.unwrap();

        assert_eq!(stored.topic, "payment-completed");
        assert_eq!(stored.event_key, "order-7");
        assert_eq!(stored.error_message, "ledger unreachable");
        assert_eq!(stored.status, FailedEventStatus::Failed);
        assert_eq!(stored.retry_count, 0);
        assert_eq!(stored.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(store.event_count().await, 1);
        assert_eq!(telemetry.counter("dead_letter_events_total"), 1);
    }

    #[tokio::test]
    async fn ignores_other_groups() {
        let store = InMemoryFailedEventStore::new();
        let handler = handler(&store, Arc::new(InMemoryTelemetry::new()));

        assert!(handler.handle(&dead_letter("order-service")).await.is_none());
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn persist_failure_is_logged_not_raised() {
        let store = InMemoryFailedEventStore::new();
        store.set_fail_on_insert(true);
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let handler = handler(&store, telemetry.clone());

        assert!(handler.handle(&dead_letter("inventory-service")).await.is_none());
        assert_eq!(telemetry.counter("dead_letter_persist_failed_total"), 1);
    }
}
