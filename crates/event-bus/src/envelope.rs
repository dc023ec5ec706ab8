use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as it travels over the bus.
///
/// The key selects the partition; all messages about one order share a key
/// and are therefore delivered in publish order to each consumer group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Unique identifier for this message.
    pub message_id: MessageId,

    /// Topic the message was published to.
    pub topic: String,

    /// Partition key, usually the order id.
    pub key: String,

    /// The message payload as JSON.
    pub payload: serde_json::Value,

    /// Transport headers (dead-letter metadata lives here).
    pub headers: HashMap<String, String>,

    /// When the message was published.
    pub timestamp: DateTime<Utc>,
}

impl MessageEnvelope {
    /// Creates a new message envelope builder.
    pub fn builder() -> MessageEnvelopeBuilder {
        MessageEnvelopeBuilder::default()
    }

    /// Returns a header value, if present.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Builder for constructing message envelopes.
#[derive(Debug, Default)]
pub struct MessageEnvelopeBuilder {
    message_id: Option<MessageId>,
    topic: Option<String>,
    key: Option<String>,
    payload: Option<serde_json::Value>,
    headers: HashMap<String, String>,
    timestamp: Option<DateTime<Utc>>,
}

impl MessageEnvelopeBuilder {
    /// Sets the topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the partition key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Copies every header of another envelope.
    pub fn headers(mut self, headers: &HashMap<String, String>) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Builds the envelope, returning None if topic, key or payload is missing.
    pub fn try_build(self) -> Option<MessageEnvelope> {
        Some(MessageEnvelope {
            message_id: self.message_id.unwrap_or_default(),
            topic: self.topic?,
            key: self.key?,
            payload: self.payload?,
            headers: self.headers,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        })
    }
}
