use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::envelope::MessageEnvelope;
use crate::error::Result;
use crate::events::SagaMessage;

/// One ordered lane of a (topic, consumer group) subscription.
///
/// A subscription partition is drained by exactly one consumer task, which
/// gives per-key ordering inside the group.
#[derive(Debug)]
pub struct Subscription {
    pub topic: String,
    pub group: String,
    pub partition: usize,
    receiver: mpsc::UnboundedReceiver<MessageEnvelope>,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        group: impl Into<String>,
        partition: usize,
        receiver: mpsc::UnboundedReceiver<MessageEnvelope>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            partition,
            receiver,
        }
    }

    /// Waits for the next message. Returns None once the bus is dropped.
    pub async fn recv(&mut self) -> Option<MessageEnvelope> {
        self.receiver.recv().await
    }

    /// Returns a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<MessageEnvelope> {
        self.receiver.try_recv().ok()
    }
}

/// Publish/subscribe transport between the services.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes an envelope to its topic.
    async fn publish(&self, envelope: MessageEnvelope) -> Result<()>;

    /// Subscribes a consumer group to a topic.
    ///
    /// Each group receives its own copy of every message published after
    /// the call. Returns one [`Subscription`] per partition.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Vec<Subscription>>;
}

/// Extension methods for event buses.
#[async_trait]
pub trait EventBusExt: EventBus {
    /// Serializes and publishes a saga event, keyed by its order id.
    async fn publish_event(&self, message: &SagaMessage) -> Result<()> {
        let envelope = message.to_envelope()?;
        self.publish(envelope).await
    }
}

impl<T: EventBus + ?Sized> EventBusExt for T {}
