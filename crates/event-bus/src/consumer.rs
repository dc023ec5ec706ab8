//! Retrying consumers.
//!
//! A [`Consumer`] binds one business [`MessageHandler`] to a consumer group.
//! Each partition of each subscribed topic is drained by its own task; a
//! failing message is retried inline according to the [`RetryPolicy`]
//! before the next message of that partition is looked at, and is
//! forwarded to the dead-letter channel once the policy is exhausted.

use std::sync::Arc;

use async_trait::async_trait;
use common::Telemetry;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::envelope::MessageEnvelope;
use crate::error::{HandlerError, Result};
use crate::events::SagaMessage;
use crate::retry::RetryPolicy;
use crate::topics;

/// Business logic invoked for each decoded message.
///
/// Live consumers and manual dead-letter replay call the same instance.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &SagaMessage) -> std::result::Result<(), HandlerError>;
}

/// How a message left the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Handled { attempts: u32 },
    DeadLettered { attempts: u32, error: String },
}

pub struct Consumer {
    group: String,
    bus: Arc<dyn EventBus>,
    handler: Arc<dyn MessageHandler>,
    policy: RetryPolicy,
    telemetry: Arc<dyn Telemetry>,
}

impl Consumer {
    pub fn new(
        group: impl Into<String>,
        bus: Arc<dyn EventBus>,
        handler: Arc<dyn MessageHandler>,
        policy: RetryPolicy,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            group: group.into(),
            bus,
            handler,
            policy,
            telemetry,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Subscribes to `topics` and spawns one task per partition.
    pub async fn spawn(self: Arc<Self>, topics: &[&str]) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();
        for topic in topics {
            let subscriptions = self.bus.subscribe(topic, &self.group).await?;
            for mut subscription in subscriptions {
                let consumer = Arc::clone(&self);
                handles.push(tokio::spawn(async move {
                    while let Some(envelope) = subscription.recv().await {
                        consumer.process(&envelope).await;
                    }
                    tracing::debug!(
                        topic = %subscription.topic,
                        partition = subscription.partition,
                        "subscription closed"
                    );
                }));
            }
            tracing::info!(group = %self.group, %topic, "consumer started");
        }
        Ok(handles)
    }

    /// Runs one message through the retry envelope.
    #[tracing::instrument(
        skip(self, envelope),
        fields(group = %self.group, topic = %envelope.topic, key = %envelope.key)
    )]
    pub async fn process(&self, envelope: &MessageEnvelope) -> Delivery {
        let mut delays = self.policy.backoff();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = match SagaMessage::decode(&envelope.topic, &envelope.payload) {
                Ok(message) => self.handler.handle(&message).await,
                Err(err) => Err(err),
            };

            let err = match result {
                Ok(()) => {
                    self.telemetry.increment(
                        "consumer_messages_handled_total",
                        &[("topic", envelope.topic.as_str()), ("group", self.group.as_str())],
                    );
                    return Delivery::Handled { attempts: attempt };
                }
                Err(err) => err,
            };

            match delays.next() {
                Some(delay) => {
                    tracing::warn!(attempt, ?delay, error = %err, "handler failed, retrying");
                    self.telemetry.increment(
                        "consumer_retries_total",
                        &[("topic", envelope.topic.as_str()), ("group", self.group.as_str())],
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    let error = err.to_string();
                    tracing::error!(attempts = attempt, %error, "retries exhausted");
                    self.dead_letter(envelope, &error).await;
                    return Delivery::DeadLettered {
                        attempts: attempt,
                        error,
                    };
                }
            }
        }
    }

    async fn dead_letter(&self, envelope: &MessageEnvelope, error: &str) {
        let mut headers = envelope.headers.clone();
        headers.insert(
            topics::HEADER_ORIGINAL_TOPIC.to_string(),
            envelope.topic.clone(),
        );
        headers.insert(topics::HEADER_CONSUMER_GROUP.to_string(), self.group.clone());
        headers.insert(
            topics::HEADER_EXCEPTION_MESSAGE.to_string(),
            error.to_string(),
        );

        let dead_letter = MessageEnvelope {
            message_id: Default::default(),
            topic: topics::dlt(&envelope.topic),
            key: envelope.key.clone(),
            payload: envelope.payload.clone(),
            headers,
            timestamp: chrono::Utc::now(),
        };

        match self.bus.publish(dead_letter).await {
            Ok(()) => {
                self.telemetry.increment(
                    "dead_letter_published_total",
                    &[("topic", envelope.topic.as_str()), ("group", self.group.as_str())],
                );
            }
            Err(err) => {
                tracing::error!(
                    error = %err,
                    payload = %envelope.payload,
                    "CRITICAL: could not publish to dead-letter topic, message dropped"
                );
                self.telemetry.increment(
                    "dead_letter_publish_failed_total",
                    &[("topic", envelope.topic.as_str()), ("group", self.group.as_str())],
                );
            }
        }
    }
}
