use std::collections::HashMap;
use std::sync::Arc;

use event_bus::{HandlerError, MessageHandler, SagaMessage, topics};

/// Maps each topic to the handler that processes it live.
#[derive(Clone, Default)]
pub struct ReplayRegistry {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl ReplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `topic`, replacing any previous one.
    pub fn register(mut self, topic: &str, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers
            .insert(topics::origin(topic).to_string(), handler);
        self
    }

    pub fn topics(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Decodes `payload` for `topic` and runs it through the registered handler.
    ///
    /// A `-dlt` suffix is ignored.
    pub async fn dispatch(
        &self,
        topic: &str,
        payload: &serde_json::Value,
    ) -> Result<(), HandlerError> {
        let origin = topics::origin(topic);
        let handler = self
            .handlers
            .get(origin)
            .ok_or_else(|| HandlerError::UnknownTopic(origin.to_string()))?;
        let message = SagaMessage::decode(origin, payload)?;
        handler.handle(&message).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use common::{Money, OrderId};
    use event_bus::PaymentCompleted;

    use super::*;

    #[derive(Default)]
    struct Counting {
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageHandler for Counting {
        async fn handle(&self, _message: &SagaMessage) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn payload() -> serde_json::Value {
        SagaMessage::PaymentCompleted(PaymentCompleted {
            order_id: OrderId::new(),
            amount: Money::from_cents(10),
            transaction_id: "TXN-1".to_string(),
            items: vec![],
        })
        .payload()
        .unwrap()
    }

    #[tokio::test]
    async fn dispatches_by_topic_ignoring_dlt_suffix() {
        let handler = Arc::new(Counting::default());
        let registry = ReplayRegistry::new().register(topics::PAYMENT_COMPLETED, handler.clone());

        registry
            .dispatch("payment-completed-dlt", &payload())
            .await
            .unwrap();
        registry
            .dispatch(topics::PAYMENT_COMPLETED, &payload())
            .await
            .unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unregistered_topic_is_an_error() {
        let registry = ReplayRegistry::new();
        let err = registry
            .dispatch(topics::PAYMENT_COMPLETED, &payload())
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::UnknownTopic(_)));
    }
}
