//! Order saga behavior against the in-memory inventory and bus.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::{InMemoryTelemetry, Money, OrderId, OwnerId, Page, ProductId};
use event_bus::{
    Consumer, InMemoryEventBus, MessageHandler, PaymentCompleted, PaymentFailed, RetryPolicy,
    SagaMessage, StockItem, topics,
};
use inventory::{
    GatewayError, InMemoryStockLedger, ReservationGateway, ReserveStockResponse, StockLedger,
};
use orders::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakingReservationClient, CreateOrder,
    InMemoryOrderRepository, InProcessReservationClient, NewOrderLine, OrderError,
    OrderSagaCoordinator, OrderStatus, ReservationClient, ReservationError,
};

struct TestHarness {
    ledger: InMemoryStockLedger,
    bus: InMemoryEventBus,
    telemetry: Arc<InMemoryTelemetry>,
    coordinator: Arc<OrderSagaCoordinator>,
}

impl TestHarness {
    fn new(stock: &[(&'static str, i64)]) -> Self {
        let ledger = InMemoryStockLedger::with_stock(stock.iter().copied());
        let bus = InMemoryEventBus::new().with_recording();
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let gateway = Arc::new(ReservationGateway::new(
            Arc::new(ledger.clone()),
            Arc::new(bus.clone()),
            telemetry.clone(),
        ));
        let client = Arc::new(InProcessReservationClient::new(gateway));
        let coordinator = Arc::new(OrderSagaCoordinator::new(
            Arc::new(InMemoryOrderRepository::new()),
            client,
            Arc::new(bus.clone()),
            telemetry.clone(),
        ));
        Self {
            ledger,
            bus,
            telemetry,
            coordinator,
        }
    }

    async fn reserved(&self, sku: &str) -> i64 {
        self.ledger
            .get(&ProductId::new(sku))
            .await
            .unwrap()
            .unwrap()
            .reserved
    }
}

fn request(lines: &[(&str, u32, i64)]) -> CreateOrder {
    CreateOrder {
        owner: OwnerId::new("alice"),
        lines: lines
            .iter()
            .map(|(sku, quantity, price)| NewOrderLine {
                product_id: ProductId::new(*sku),
                product_name: format!("Product {sku}"),
                quantity: *quantity,
                unit_price: Money::from_cents(*price),
            })
            .collect(),
        shipping_address: Some("1 Main St".to_string()),
    }
}

fn payment_completed(order_id: OrderId) -> SagaMessage {
    SagaMessage::PaymentCompleted(PaymentCompleted {
        order_id,
        amount: Money::from_cents(100),
        transaction_id: "TXN-0123456789AB".to_string(),
        items: vec![],
    })
}

fn payment_failed(order_id: OrderId) -> SagaMessage {
    SagaMessage::PaymentFailed(PaymentFailed {
        order_id,
        amount: Money::from_cents(100),
        reason: "Card declined".to_string(),
        items: vec![StockItem {
            product_id: ProductId::new("SKU-1"),
            quantity: 1,
        }],
    })
}

#[tokio::test]
async fn created_order_reserves_every_line_and_publishes() {
    let h = TestHarness::new(&[("SKU-1", 10), ("SKU-2", 5)]);

    let order = h
        .coordinator
        .create_order(request(&[("SKU-1", 2, 1_000), ("SKU-2", 1, 500)]))
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::InventoryReserved);
    assert_eq!(order.total, Money::from_cents(2_500));
    assert_eq!(h.reserved("SKU-1").await, 2);
    assert_eq!(h.reserved("SKU-2").await, 1);

    let created = h.bus.published_to(topics::ORDER_CREATED).await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].key, order.id.to_string());
    assert_eq!(created[0].payload["total_amount"], 2_500);
    assert_eq!(created[0].payload["items"].as_array().unwrap().len(), 2);
    assert_eq!(h.bus.published_to(topics::INVENTORY_RESERVED).await.len(), 2);
    assert_eq!(h.telemetry.counter("orders_created_total"), 1);
    assert_eq!(h.telemetry.sample_count("order_creation_duration_seconds"), 1);
}

#[tokio::test]
async fn partial_reservation_is_compensated() {
    let h = TestHarness::new(&[("SKU-1", 10), ("SKU-2", 1)]);

    let err = h
        .coordinator
        .create_order(request(&[("SKU-1", 3, 100), ("SKU-2", 2, 100)]))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::InsufficientStock(ref p) if p.as_str() == "SKU-2"));
    assert_eq!(h.reserved("SKU-1").await, 0);
    assert_eq!(h.reserved("SKU-2").await, 0);
    assert!(h.bus.published_to(topics::ORDER_CREATED).await.is_empty());
    assert_eq!(h.telemetry.counter("orders_compensations_total"), 1);
    assert_eq!(
        h.telemetry
            .counter_with("orders_rejected_total", "reason", "insufficient_stock"),
        1
    );

    let orders = h
        .coordinator
        .list_orders(&OwnerId::new("alice"), Page::default())
        .await
        .unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn invalid_request_persists_nothing() {
    let h = TestHarness::new(&[("SKU-1", 10)]);

    let err = h
        .coordinator
        .create_order(request(&[("SKU-1", 0, 100)]))
        .await
        .unwrap_err();

    assert!(matches!(err, OrderError::Validation(_)));
    let orders = h
        .coordinator
        .list_orders(&OwnerId::new("alice"), Page::default())
        .await
        .unwrap();
    assert!(orders.is_empty());
}

#[tokio::test]
async fn publish_failure_keeps_the_order() {
    let h = TestHarness::new(&[("SKU-1", 10)]);
    h.bus.set_unavailable(true);

    let order = h
        .coordinator
        .create_order(request(&[("SKU-1", 1, 100)]))
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::InventoryReserved);
    assert_eq!(
        h.telemetry
            .counter_with("publish_failures_total", "topic", topics::ORDER_CREATED),
        1
    );
}

#[tokio::test]
async fn payment_outcomes_never_regress() {
    let h = TestHarness::new(&[("SKU-1", 10)]);
    let order = h
        .coordinator
        .create_order(request(&[("SKU-1", 1, 100)]))
        .await
        .unwrap();

    h.coordinator.handle(&payment_completed(order.id)).await.unwrap();
    h.coordinator.handle(&payment_failed(order.id)).await.unwrap();
    h.coordinator.handle(&payment_completed(order.id)).await.unwrap();

    let stored = h.coordinator.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::PaymentCompleted);
}

#[tokio::test]
async fn payment_failure_is_recorded() {
    let h = TestHarness::new(&[("SKU-1", 10)]);
    let order = h
        .coordinator
        .create_order(request(&[("SKU-1", 1, 100)]))
        .await
        .unwrap();

    h.coordinator.handle(&payment_failed(order.id)).await.unwrap();

    let stored = h.coordinator.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::PaymentFailed);
}

#[tokio::test]
async fn cancelled_order_ignores_payment() {
    let h = TestHarness::new(&[("SKU-1", 10)]);
    let order = h
        .coordinator
        .create_order(request(&[("SKU-1", 1, 100)]))
        .await
        .unwrap();
    h.coordinator
        .cancel_order(order.id, &OwnerId::new("alice"))
        .await
        .unwrap();

    h.coordinator.handle(&payment_completed(order.id)).await.unwrap();

    let stored = h.coordinator.get_order(order.id).await.unwrap();
    assert_eq!(stored.status, OrderStatus::Cancelled);

    let again = h
        .coordinator
        .cancel_order(order.id, &OwnerId::new("alice"))
        .await
        .unwrap();
    assert_eq!(again.version, stored.version);
}

#[tokio::test]
async fn inventory_reserved_confirms_lines_through_the_bus() {
    let h = TestHarness::new(&[("SKU-1", 10), ("SKU-2", 10)]);
    let consumer = Arc::new(Consumer::new(
        orders::CONSUMER_GROUP,
        Arc::new(h.bus.clone()),
        h.coordinator.clone(),
        RetryPolicy::three_attempts()
            .with_delays(Duration::from_millis(5), Duration::from_millis(20)),
        h.telemetry.clone(),
    ));
    let handles = consumer.spawn(&[topics::INVENTORY_RESERVED]).await.unwrap();

    let order = h
        .coordinator
        .create_order(request(&[("SKU-1", 1, 100), ("SKU-2", 2, 100)]))
        .await
        .unwrap();

    let mut confirmed = false;
    for _ in 0..100 {
        let stored = h.coordinator.get_order(order.id).await.unwrap();
        if stored.lines.iter().all(|l| l.reservation_confirmed) {
            confirmed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(confirmed, "lines were not confirmed");

    for handle in handles {
        handle.abort();
    }
}

/// Reservation client whose gateway always errors.
struct BrokenClient;

#[async_trait]
impl ReservationClient for BrokenClient {
    async fn reserve(
        &self,
        _order_id: OrderId,
        _product_id: &ProductId,
        _quantity: u32,
    ) -> Result<ReserveStockResponse, ReservationError> {
        Err(ReservationError::Gateway(GatewayError::Internal))
    }

    async fn release(
        &self,
        _order_id: OrderId,
        _product_id: &ProductId,
        _quantity: u32,
    ) -> Result<bool, ReservationError> {
        Ok(false)
    }
}

#[tokio::test]
async fn open_breaker_short_circuits_creation() {
    let telemetry = Arc::new(InMemoryTelemetry::new());
    let breaker = Arc::new(CircuitBreaker::new(
        "inventory",
        CircuitBreakerConfig::default(),
        telemetry.clone(),
    ));
    let coordinator = OrderSagaCoordinator::new(
        Arc::new(InMemoryOrderRepository::new()),
        Arc::new(CircuitBreakingReservationClient::new(BrokenClient, breaker.clone())),
        Arc::new(InMemoryEventBus::new()),
        telemetry.clone(),
    );

    for _ in 0..5 {
        let err = coordinator
            .create_order(request(&[("SKU-1", 1, 100)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrderError::Reservation(ReservationError::Gateway(_))
        ));
    }

    let err = coordinator
        .create_order(request(&[("SKU-1", 1, 100)]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrderError::Reservation(ReservationError::Unavailable)
    ));
    assert_eq!(err.to_string(), "Reservation failed: Inventory service unavailable");
    assert_eq!(
        telemetry.counter_with("orders_rejected_total", "reason", "reservation_error"),
        6
    );
}

/// Answers the first reservation at once and delays the rest.
struct SlowClient {
    inner: InProcessReservationClient,
    calls: AtomicU32,
}

#[async_trait]
impl ReservationClient for SlowClient {
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReserveStockResponse, ReservationError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        self.inner.reserve(order_id, product_id, quantity).await
    }

    async fn release(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool, ReservationError> {
        self.inner.release(order_id, product_id, quantity).await
    }
}

#[tokio::test]
async fn abandoned_submission_still_compensates() {
    let ledger = InMemoryStockLedger::with_stock([("SKU-1", 10), ("SKU-2", 1)]);
    let bus = InMemoryEventBus::new();
    let telemetry = Arc::new(InMemoryTelemetry::new());
    let gateway = Arc::new(ReservationGateway::new(
        Arc::new(ledger.clone()),
        Arc::new(bus.clone()),
        telemetry.clone(),
    ));
    let coordinator = Arc::new(OrderSagaCoordinator::new(
        Arc::new(InMemoryOrderRepository::new()),
        Arc::new(SlowClient {
            inner: InProcessReservationClient::new(gateway),
            calls: AtomicU32::new(0),
        }),
        Arc::new(bus),
        telemetry,
    ));
    let sku = ProductId::new("SKU-1");

    // The caller gives up while the second line is still being reserved.
    let caller = tokio::time::timeout(
        Duration::from_millis(20),
        coordinator.submit_order(request(&[("SKU-1", 2, 1_000), ("SKU-2", 5, 500)])),
    )
    .await;
    assert!(caller.is_err());
    assert_eq!(ledger.get(&sku).await.unwrap().unwrap().reserved, 2);

    let owner = OwnerId::new("alice");
    for _ in 0..100 {
        let orders = coordinator.list_orders(&owner, Page::default()).await.unwrap();
        let reserved = ledger.get(&sku).await.unwrap().unwrap().reserved;
        if reserved == 0 && orders.first().map(|o| o.status) == Some(OrderStatus::Cancelled) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("abandoned order was never compensated");
}
