//! Composition root: stores, services, consumers and dead-letter handlers.

use std::collections::HashMap;
use std::sync::Arc;

use common::{ProductId, Telemetry};
use dead_letter::{
    DeadLetterHandler, FailedEventService, FailedEventStore, InMemoryFailedEventStore,
    PostgresFailedEventStore, ReplayRegistry,
};
use event_bus::{
    Consumer, EventBus, InMemoryProcessedMessages, MessageHandler, PostgresProcessedMessages,
    ProcessedMessages, RetryPolicy, topics,
};
use inventory::{
    InMemoryStockLedger, LedgerError, PaymentOutcomeHandler, PostgresStockLedger,
    ReservationGateway, StockLedger,
};
use orders::{
    CircuitBreaker, CircuitBreakingReservationClient, InMemoryOrderRepository,
    InProcessReservationClient, OrderRepository, OrderSagaCoordinator, PostgresOrderRepository,
};
use payments::{
    ChargeGateway, InMemoryPaymentRepository, PaymentProcessor, PaymentRepository,
    PostgresPaymentRepository,
};
use sqlx::PgPool;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::ApiError;

/// Service names used in the operator routes.
pub const INVENTORY_SERVICE: &str = "inventory";
pub const ORDER_SERVICE: &str = "orders";
pub const PAYMENT_SERVICE: &str = "payments";

const INVENTORY_TOPICS: &[&str] = &[topics::PAYMENT_COMPLETED, topics::PAYMENT_FAILED];
const ORDER_TOPICS: &[&str] = &[
    topics::PAYMENT_COMPLETED,
    topics::PAYMENT_FAILED,
    topics::INVENTORY_RESERVED,
];
const PAYMENT_TOPICS: &[&str] = &[topics::ORDER_CREATED];

/// Persistence of every service.
pub struct Stores {
    pub ledger: Arc<dyn StockLedger>,
    pub processed: Arc<dyn ProcessedMessages>,
    pub orders: Arc<dyn OrderRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub failed_events: Arc<dyn FailedEventStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            ledger: Arc::new(InMemoryStockLedger::new()),
            processed: Arc::new(InMemoryProcessedMessages::new()),
            orders: Arc::new(InMemoryOrderRepository::new()),
            payments: Arc::new(InMemoryPaymentRepository::new()),
            failed_events: Arc::new(InMemoryFailedEventStore::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            ledger: Arc::new(PostgresStockLedger::new(pool.clone())),
            processed: Arc::new(PostgresProcessedMessages::new(pool.clone())),
            orders: Arc::new(PostgresOrderRepository::new(pool.clone())),
            payments: Arc::new(PostgresPaymentRepository::new(pool.clone())),
            failed_events: Arc::new(PostgresFailedEventStore::new(pool)),
        }
    }
}

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub coordinator: Arc<OrderSagaCoordinator>,
    pub reservations: Arc<ReservationGateway>,
    pub payments: Arc<PaymentProcessor>,
    pub failed_events: HashMap<&'static str, FailedEventService>,
}

impl AppState {
    /// Operator service of `service`, one of `inventory`, `orders`, `payments`.
    pub fn failed_events(&self, service: &str) -> Result<&FailedEventService, ApiError> {
        self.failed_events
            .get(service)
            .ok_or_else(|| ApiError::NotFound(format!("Unknown service: {service}")))
    }
}

/// Bus wiring of one consumer group.
struct Subscriber {
    topics: &'static [&'static str],
    consumer: Arc<Consumer>,
    dead_letters: Arc<DeadLetterHandler>,
}

/// The three services composed over one bus.
pub struct Services {
    pub state: Arc<AppState>,
    ledger: Arc<dyn StockLedger>,
    bus: Arc<dyn EventBus>,
    subscribers: Vec<Subscriber>,
}

impl Services {
    pub fn build(
        config: &Config,
        stores: Stores,
        bus: Arc<dyn EventBus>,
        charges: Arc<dyn ChargeGateway>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let reservations = Arc::new(ReservationGateway::new(
            stores.ledger.clone(),
            bus.clone(),
            telemetry.clone(),
        ));
        let breaker = Arc::new(CircuitBreaker::new(
            "inventory-reservation",
            config.breaker,
            telemetry.clone(),
        ));
        let client = CircuitBreakingReservationClient::new(
            InProcessReservationClient::new(reservations.clone()),
            breaker,
        );
        let coordinator = Arc::new(OrderSagaCoordinator::new(
            stores.orders,
            Arc::new(client),
            bus.clone(),
            telemetry.clone(),
        ));
        let processor = Arc::new(PaymentProcessor::new(
            stores.payments,
            charges,
            bus.clone(),
            telemetry.clone(),
        ));
        let outcomes = Arc::new(PaymentOutcomeHandler::new(
            stores.ledger.clone(),
            stores.processed,
            telemetry.clone(),
        ));

        let wiring = Wiring {
            config,
            bus: &bus,
            failed_events: &stores.failed_events,
            telemetry: &telemetry,
        };
        let mut failed_events = HashMap::new();
        let mut subscribers = Vec::new();
        for (service, group, topics, handler, attempts) in [
            (
                INVENTORY_SERVICE,
                inventory::CONSUMER_GROUP,
                INVENTORY_TOPICS,
                outcomes as Arc<dyn MessageHandler>,
                4,
            ),
            (
                ORDER_SERVICE,
                orders::CONSUMER_GROUP,
                ORDER_TOPICS,
                coordinator.clone() as Arc<dyn MessageHandler>,
                3,
            ),
            (
                PAYMENT_SERVICE,
                payments::CONSUMER_GROUP,
                PAYMENT_TOPICS,
                processor.clone() as Arc<dyn MessageHandler>,
                3,
            ),
        ] {
            let (subscriber, operator) =
                wiring.subscriber(group, topics, handler, config.retry_policy(attempts));
            subscribers.push(subscriber);
            failed_events.insert(service, operator);
        }

        let state = Arc::new(AppState {
            coordinator,
            reservations,
            payments: processor,
            failed_events,
        });

        Self {
            state,
            ledger: stores.ledger,
            bus,
            subscribers,
        }
    }

    /// Onboards the configured products. Existing records are left alone.
    pub async fn seed_inventory(&self, seed: &[(ProductId, i64)]) -> Result<(), LedgerError> {
        for (product_id, quantity) in seed {
            match self.ledger.create_record(product_id, *quantity).await {
                Ok(_) => tracing::info!(%product_id, quantity, "stock record seeded"),
                Err(LedgerError::AlreadyExists(_)) => {
                    tracing::debug!(%product_id, "stock record already present")
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Starts the dead-letter handlers, then the consumers.
    ///
    /// Subscribers only receive messages published after this returns.
    pub async fn start(&self) -> event_bus::Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();
        for subscriber in &self.subscribers {
            handles.extend(
                subscriber
                    .dead_letters
                    .clone()
                    .spawn(self.bus.as_ref(), subscriber.topics)
                    .await?,
            );
            handles.extend(subscriber.consumer.clone().spawn(subscriber.topics).await?);
        }
        tracing::info!(tasks = handles.len(), "saga consumers started");
        Ok(handles)
    }
}

struct Wiring<'a> {
    config: &'a Config,
    bus: &'a Arc<dyn EventBus>,
    failed_events: &'a Arc<dyn FailedEventStore>,
    telemetry: &'a Arc<dyn Telemetry>,
}

impl Wiring<'_> {
    fn subscriber(
        &self,
        group: &'static str,
        topics: &'static [&'static str],
        handler: Arc<dyn MessageHandler>,
        policy: RetryPolicy,
    ) -> (Subscriber, FailedEventService) {
        let registry = topics.iter().fold(ReplayRegistry::new(), |registry, topic| {
            registry.register(topic, handler.clone())
        });
        let operator = FailedEventService::new(
            group,
            self.failed_events.clone(),
            registry,
            self.telemetry.clone(),
        );
        let dead_letters = DeadLetterHandler::new(
            group,
            self.failed_events.clone(),
            self.telemetry.clone(),
        )
        .with_max_retries(self.config.failed_event_max_retries);
        let consumer = Consumer::new(
            group,
            self.bus.clone(),
            handler,
            policy,
            self.telemetry.clone(),
        );

        (
            Subscriber {
                topics,
                consumer: Arc::new(consumer),
                dead_letters: Arc::new(dead_letters),
            },
            operator,
        )
    }
}
