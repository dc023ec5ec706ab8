//! Topic names and dead-letter conventions.

pub const ORDER_CREATED: &str = "order-created";
pub const PAYMENT_COMPLETED: &str = "payment-completed";
pub const PAYMENT_FAILED: &str = "payment-failed";
pub const INVENTORY_RESERVED: &str = "inventory-reserved";

/// Every business topic.
pub const ALL: [&str; 4] = [
    ORDER_CREATED,
    PAYMENT_COMPLETED,
    PAYMENT_FAILED,
    INVENTORY_RESERVED,
];

pub const DLT_SUFFIX: &str = "-dlt";

/// Header carrying the topic a dead-lettered message came from.
pub const HEADER_ORIGINAL_TOPIC: &str = "x-original-topic";
/// Header carrying the consumer group that gave up on the message.
pub const HEADER_CONSUMER_GROUP: &str = "x-consumer-group";
/// Header carrying the last handler error.
pub const HEADER_EXCEPTION_MESSAGE: &str = "x-exception-message";

/// Returns the dead-letter channel for `topic`.
pub fn dlt(topic: &str) -> String {
    format!("{topic}{DLT_SUFFIX}")
}

/// Strips the dead-letter suffix, if any.
pub fn origin(topic: &str) -> &str {
    topic.strip_suffix(DLT_SUFFIX).unwrap_or(topic)
}

pub fn is_dlt(topic: &str) -> bool {
    topic.ends_with(DLT_SUFFIX)
}
