use chrono::{DateTime, Utc};
use common::Version;
use serde::{Deserialize, Serialize};

/// Store-assigned, monotonically increasing identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailedEventId(i64);

impl FailedEventId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for FailedEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a failed event.
///
/// ```text
/// FAILED ──retry──► RETRYING ──ok──► RESOLVED
///   ▲                  │
///   └──────error───────┘
/// FAILED | RETRYING ──discard──► DISCARDED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailedEventStatus {
    Failed,
    Retrying,
    Resolved,
    Discarded,
}

impl FailedEventStatus {
    /// Still needs operator attention.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, FailedEventStatus::Failed | FailedEventStatus::Retrying)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailedEventStatus::Failed => "FAILED",
            FailedEventStatus::Retrying => "RETRYING",
            FailedEventStatus::Resolved => "RESOLVED",
            FailedEventStatus::Discarded => "DISCARDED",
        }
    }
}

impl std::fmt::Display for FailedEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FailedEventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FAILED" => Ok(FailedEventStatus::Failed),
            "RETRYING" => Ok(FailedEventStatus::Retrying),
            "RESOLVED" => Ok(FailedEventStatus::Resolved),
            "DISCARDED" => Ok(FailedEventStatus::Discarded),
            other => Err(format!("unknown failed event status: {other}")),
        }
    }
}

/// A message that exhausted its consumer's retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedEvent {
    pub id: FailedEventId,
    /// Consumer group whose handler gave up on the message.
    pub consumer_group: String,
    /// Origin topic (never the `-dlt` channel).
    pub topic: String,
    /// Message key, normally the order id.
    pub event_key: String,
    pub payload: serde_json::Value,
    pub error_message: String,
    pub status: FailedEventStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl FailedEvent {
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }

    /// Marks a manual replay as started.
    pub fn begin_retry(&mut self) {
        self.status = FailedEventStatus::Retrying;
        self.retry_count += 1;
        self.updated_at = Utc::now();
    }

    pub fn resolve(&mut self) {
        let now = Utc::now();
        self.status = FailedEventStatus::Resolved;
        self.resolved_at = Some(now);
        self.updated_at = now;
    }

    /// Returns the event to FAILED with the latest error.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = FailedEventStatus::Failed;
        self.error_message = error.into();
        self.updated_at = Utc::now();
    }

    pub fn discard(&mut self) {
        let now = Utc::now();
        self.status = FailedEventStatus::Discarded;
        self.resolved_at = Some(now);
        self.updated_at = now;
    }
}

/// Data captured from a dead-letter message before the store assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFailedEvent {
    pub consumer_group: String,
    pub topic: String,
    pub event_key: String,
    pub payload: serde_json::Value,
    pub error_message: String,
    pub max_retries: i32,
}

impl NewFailedEvent {
    /// Builds the stored row with status FAILED and no retries.
    pub fn into_failed_event(self, id: FailedEventId) -> FailedEvent {
        let now = Utc::now();
        FailedEvent {
            id,
            consumer_group: self.consumer_group,
            topic: self.topic,
            event_key: self.event_key,
            payload: self.payload,
            error_message: self.error_message,
            status: FailedEventStatus::Failed,
            retry_count: 0,
            max_retries: self.max_retries,
            version: Version::first(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }
}
