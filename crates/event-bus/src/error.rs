use thiserror::Error;

/// Errors raised by the bus itself.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker rejected or could not accept the message.
    #[error("Event bus unavailable: {0}")]
    Unavailable(String),

    /// The consumer group already has a subscription for the topic.
    #[error("Consumer group {group} is already subscribed to {topic}")]
    AlreadySubscribed { topic: String, group: String },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Failure reported by a [`crate::MessageHandler`].
///
/// Every variant is retried by the consumer; what is left after the last
/// attempt goes to the dead-letter channel.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// No event kind is registered for the topic.
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// The payload does not match the topic's schema.
    #[error("Failed to decode {topic} payload: {source}")]
    Decode {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    /// The handler received an event kind it does not process.
    #[error("Handler does not accept {0} events")]
    Unsupported(String),

    /// Business processing failed.
    #[error("{0}")]
    Processing(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Wraps a service error as a processing failure.
    pub fn processing<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        HandlerError::Processing(Box::new(err))
    }
}
