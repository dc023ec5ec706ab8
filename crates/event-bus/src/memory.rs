use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use crate::bus::{EventBus, Subscription};
use crate::envelope::MessageEnvelope;
use crate::error::{BusError, Result};

pub const DEFAULT_PARTITIONS: usize = 4;

type GroupLanes = HashMap<String, Vec<mpsc::UnboundedSender<MessageEnvelope>>>;

#[derive(Default)]
struct Inner {
    partitions: usize,
    routes: RwLock<HashMap<String, GroupLanes>>,
    recording: AtomicBool,
    published: RwLock<Vec<MessageEnvelope>>,
    unavailable: AtomicBool,
}

/// In-process event bus with consumer groups and key-hashed partitions.
///
/// Used by the single-binary deployment and by tests. Delivered messages
/// live only in the subscriber channels; [`Self::with_recording`] adds a log
/// of every accepted message for inspection in tests.
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

impl InMemoryEventBus {
    /// Creates a bus with [`DEFAULT_PARTITIONS`] partitions per subscription.
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Creates a bus with the given number of partitions (at least one).
    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                ..Default::default()
            }),
        }
    }

    /// Keeps every accepted message for [`Self::published`] and
    /// [`Self::published_to`]. The log is never trimmed.
    pub fn with_recording(self) -> Self {
        self.inner.recording.store(true, Ordering::SeqCst);
        self
    }

    /// Makes every publish fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns the partition a key maps to.
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.inner.partitions as u64) as usize
    }

    /// Returns every message accepted so far, in publish order. Empty unless
    /// the bus was built [`Self::with_recording`].
    pub async fn published(&self) -> Vec<MessageEnvelope> {
        self.inner.published.read().await.clone()
    }

    /// Returns the messages accepted on one topic.
    pub async fn published_to(&self, topic: &str) -> Vec<MessageEnvelope> {
        self.inner
            .published
            .read()
            .await
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, envelope: MessageEnvelope) -> Result<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable(format!(
                "cannot publish to {}",
                envelope.topic
            )));
        }

        let partition = self.partition_for(&envelope.key);
        {
            let routes = self.inner.routes.read().await;
            if let Some(groups) = routes.get(&envelope.topic) {
                for (group, lanes) in groups {
                    if lanes[partition].send(envelope.clone()).is_err() {
                        tracing::debug!(topic = %envelope.topic, %group, "subscriber dropped");
                    }
                }
            }
        }

        if self.inner.recording.load(Ordering::SeqCst) {
            self.inner.published.write().await.push(envelope);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Vec<Subscription>> {
        let mut routes = self.inner.routes.write().await;
        let groups = routes.entry(topic.to_string()).or_default();
        if groups.contains_key(group) {
            return Err(BusError::AlreadySubscribed {
                topic: topic.to_string(),
                group: group.to_string(),
            });
        }

        let mut senders = Vec::with_capacity(self.inner.partitions);
        let mut subscriptions = Vec::with_capacity(self.inner.partitions);
        for partition in 0..self.inner.partitions {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            subscriptions.push(Subscription::new(topic, group, partition, rx));
        }
        groups.insert(group.to_string(), senders);

        Ok(subscriptions)
    }
}
