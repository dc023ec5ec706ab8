//! Integration tests for the API server.
//!
//! Every test composes the three services over an in-memory bus with
//! millisecond backoff, so retries and dead-lettering finish quickly.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::config::Config;
use api::{Services, Stores};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{MetricsTelemetry, Money, OrderId, ProductId};
use event_bus::{EventBusExt, InMemoryEventBus, PaymentFailed, SagaMessage, StockItem};
use inventory::{InMemoryStockLedger, StockLedger};
use metrics_exporter_prometheus::PrometheusHandle;
use payments::InMemoryChargeGateway;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: Router,
    ledger: InMemoryStockLedger,
    charges: InMemoryChargeGateway,
    bus: InMemoryEventBus,
    _workers: Vec<JoinHandle<()>>,
}

impl TestApp {
    async fn new() -> Self {
        let ledger = InMemoryStockLedger::with_stock([("SKU-001", 10), ("SKU-002", 5)]);
        let charges = InMemoryChargeGateway::new();
        let bus = InMemoryEventBus::with_partitions(2).with_recording();
        let config = Config {
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(4),
            ..Config::default()
        };
        let stores = Stores {
            ledger: Arc::new(ledger.clone()),
            ..Stores::in_memory()
        };

        let services = Services::build(
            &config,
            stores,
            Arc::new(bus.clone()),
            Arc::new(charges.clone()),
            Arc::new(MetricsTelemetry),
        );
        let workers = services.start().await.unwrap();
        let app = api::create_app(services.state.clone(), get_metrics_handle());

        Self {
            app,
            ledger,
            charges,
            bus,
            _workers: workers,
        }
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        owner: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(owner) = owner {
            builder = builder.header("x-owner-id", owner);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn create_order(&self, owner: &str, items: Value) -> (StatusCode, Value) {
        self.send("POST", "/orders", Some(owner), Some(json!({ "items": items })))
            .await
    }

    async fn available(&self, sku: &str) -> i64 {
        let (status, json) = self
            .send("GET", &format!("/inventory/{sku}"), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        json["available_stock"].as_i64().unwrap()
    }

    async fn wait_for_order_status(&self, owner: &str, id: &str, expected: &str) -> Value {
        for _ in 0..200 {
            let (_, json) = self
                .send("GET", &format!("/orders/{id}"), Some(owner), None)
                .await;
            if json["status"] == expected {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("order {id} never reached {expected}");
    }

    async fn wait_for_failed_count(&self, service: &str, expected: u64) {
        for _ in 0..200 {
            let (_, json) = self
                .send(
                    "GET",
                    &format!("/ops/{service}/failed-events/count"),
                    None,
                    None,
                )
                .await;
            if json["count"].as_u64() == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{service} never reached {expected} failed events");
    }

    async fn wait_for_stock(&self, sku: &str, quantity: i64, reserved: i64) {
        let product_id = ProductId::new(sku);
        for _ in 0..200 {
            let record = self.ledger.get(&product_id).await.unwrap().unwrap();
            if record.quantity == quantity && record.reserved == reserved {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("{sku} never reached quantity {quantity} / reserved {reserved}");
    }
}

fn widget(quantity: u32) -> Value {
    json!({
        "product_id": "SKU-001",
        "product_name": "Widget",
        "quantity": quantity,
        "unit_price_cents": 1000
    })
}

fn gadget(quantity: u32) -> Value {
    json!({
        "product_id": "SKU-002",
        "product_name": "Gadget",
        "quantity": quantity,
        "unit_price_cents": 2500
    })
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new().await;

    let (status, json) = app.send("GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["services"], json!(["inventory", "orders", "payments"]));
}

#[tokio::test]
async fn test_create_order_completes_saga() {
    let app = TestApp::new().await;

    let (status, json) = app
        .create_order("alice", json!([widget(2), gadget(1)]))
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["status"], "INVENTORY_RESERVED");
    assert_eq!(json["owner_id"], "alice");
    assert_eq!(json["total_cents"], 4500);
    assert_eq!(json["items"].as_array().unwrap().len(), 2);

    let id = json["id"].as_str().unwrap().to_string();
    let order = app
        .wait_for_order_status("alice", &id, "PAYMENT_COMPLETED")
        .await;
    assert_eq!(order["id"], id.as_str());

    // Deduction moves the reserved units out of the quantity.
    app.wait_for_stock("SKU-001", 8, 0).await;
    app.wait_for_stock("SKU-002", 4, 0).await;
    assert_eq!(app.available("SKU-001").await, 8);

    let (status, payment) = app
        .send("GET", &format!("/orders/{id}/payment"), Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["status"], "COMPLETED");
    assert_eq!(payment["amount_cents"], 4500);
    assert!(payment["transaction_id"].as_str().unwrap().starts_with("TXN-"));
}

#[tokio::test]
async fn test_declined_payment_releases_stock() {
    let app = TestApp::new().await;
    app.charges.set_decline(Some("Card declined"));

    let (status, json) = app.create_order("alice", json!([widget(3)])).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = json["id"].as_str().unwrap().to_string();

    app.wait_for_order_status("alice", &id, "PAYMENT_FAILED")
        .await;
    app.wait_for_stock("SKU-001", 10, 0).await;

    let (_, payment) = app
        .send("GET", &format!("/orders/{id}/payment"), Some("alice"), None)
        .await;
    assert_eq!(payment["status"], "FAILED");
    assert_eq!(payment["failure_reason"], "Card declined");
}

#[tokio::test]
async fn test_insufficient_stock_rejects_and_compensates() {
    let app = TestApp::new().await;

    let (status, json) = app
        .create_order("alice", json!([widget(2), gadget(6)]))
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("SKU-002"));
    assert_eq!(app.available("SKU-001").await, 10);
    assert_eq!(app.available("SKU-002").await, 5);

    let (_, orders) = app.send("GET", "/orders", Some("alice"), None).await;
    let orders = orders.as_array().unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["status"], "CANCELLED");
    assert!(app.bus.published_to("order-created").await.is_empty());
}

#[tokio::test]
async fn test_create_order_validation() {
    let app = TestApp::new().await;

    let (status, json) = app.create_order("alice", json!([])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().is_some());

    let (status, _) = app.create_order("alice", json!([widget(0)])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let overflowing = json!({
        "product_id": "SKU-001",
        "product_name": "Widget",
        "quantity": 3,
        "unit_price_cents": i64::MAX / 2
    });
    let (status, json) = app.create_order("alice", json!([overflowing])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("too large"));
    assert_eq!(app.available("SKU-001").await, 10);

    let (_, orders) = app.send("GET", "/orders", Some("alice"), None).await;
    assert!(orders.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_owner_header_required() {
    let app = TestApp::new().await;

    let (status, json) = app
        .send("POST", "/orders", None, Some(json!({ "items": [widget(1)] })))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].as_str().unwrap().contains("x-owner-id"));
}

#[tokio::test]
async fn test_get_order_errors() {
    let app = TestApp::new().await;
    let (_, json) = app.create_order("alice", json!([widget(1)])).await;
    let id = json["id"].as_str().unwrap();

    let (status, _) = app
        .send("GET", &format!("/orders/{id}"), Some("mallory"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send("GET", "/orders/not-a-uuid", Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            "GET",
            &format!("/orders/{}", OrderId::new()),
            Some("alice"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_orders_is_scoped_to_owner() {
    let app = TestApp::new().await;
    app.create_order("alice", json!([widget(1)])).await;
    app.create_order("alice", json!([gadget(1)])).await;
    app.create_order("bob", json!([widget(1)])).await;

    let (status, json) = app
        .send("GET", "/orders?page=0&size=10", Some("alice"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let orders = json.as_array().unwrap();
    assert_eq!(orders.len(), 2);
    assert!(orders.iter().all(|o| o["owner_id"] == "alice"));

    let (_, json) = app
        .send("GET", "/orders?page=0&size=1", Some("alice"), None)
        .await;
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_order() {
    let app = TestApp::new().await;
    let (_, json) = app.create_order("alice", json!([widget(1)])).await;
    let id = json["id"].as_str().unwrap().to_string();
    let uri = format!("/orders/{id}/cancel");

    let (status, _) = app.send("POST", &uri, Some("bob"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = app.send("POST", &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "CANCELLED");

    let (status, json) = app.send("POST", &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "CANCELLED");
}

#[tokio::test]
async fn test_stock_check() {
    let app = TestApp::new().await;

    let (status, json) = app.send("GET", "/inventory/SKU-002", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["product_id"], "SKU-002");
    assert_eq!(json["available_stock"], 5);
    assert_eq!(json["in_stock"], true);

    let (status, _) = app.send("GET", "/inventory/SKU-404", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ops_routes_validate_input() {
    let app = TestApp::new().await;

    let (status, _) = app
        .send("GET", "/ops/shipping/failed-events/count", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = app
        .send("GET", "/ops/inventory/failed-events/count", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 0);

    let (status, json) = app
        .send("GET", "/ops/orders/failed-events", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!([]));

    let (status, _) = app
        .send("POST", "/ops/inventory/failed-events/abc/retry", None, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send("POST", "/ops/inventory/failed-events/42/retry", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dead_lettered_release_is_replayed_by_operator() {
    let app = TestApp::new().await;
    // Payments never settle, so the only payment-failed is the one below.
    app.charges.set_fail(true);

    let (status, json) = app.create_order("alice", json!([widget(3)])).await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id: OrderId = serde_json::from_value(json["id"].clone()).unwrap();
    app.wait_for_failed_count("payments", 1).await;

    app.ledger.set_fail_on_write(true);
    app.bus
        .publish_event(&SagaMessage::PaymentFailed(PaymentFailed {
            order_id,
            amount: Money::from_cents(3000),
            reason: "Card declined".to_string(),
            items: vec![StockItem {
                product_id: ProductId::new("SKU-001"),
                quantity: 3,
            }],
        }))
        .await
        .unwrap();
    app.wait_for_failed_count("inventory", 1).await;
    app.wait_for_stock("SKU-001", 10, 3).await;

    let (status, events) = app
        .send("GET", "/ops/inventory/failed-events/failed", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let event = &events[0];
    assert_eq!(event["topic"], "payment-failed");
    assert_eq!(event["consumer_group"], "inventory-service");
    assert_eq!(event["status"], "FAILED");
    assert_eq!(event["retry_count"], 0);
    let event_id = event["id"].as_i64().unwrap();

    app.ledger.set_fail_on_write(false);
    let retry_uri = format!("/ops/inventory/failed-events/{event_id}/retry");
    let (status, json) = app.send("POST", &retry_uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["outcome"], "RESOLVED");

    app.wait_for_stock("SKU-001", 10, 0).await;
    app.wait_for_failed_count("inventory", 0).await;

    let (status, event) = app
        .send(
            "GET",
            &format!("/ops/inventory/failed-events/{event_id}"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(event["status"], "RESOLVED");
    assert_eq!(event["retry_count"], 1);

    let (status, _) = app.send("POST", &retry_uri, None, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // The payment side gave up on order-created; the operator drops it.
    let (_, events) = app
        .send("GET", "/ops/payments/failed-events", None, None)
        .await;
    let payment_event_id = events[0]["id"].as_i64().unwrap();
    let (status, json) = app
        .send(
            "POST",
            &format!("/ops/payments/failed-events/{payment_event_id}/discard"),
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "DISCARDED");
    app.wait_for_failed_count("payments", 0).await;
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = TestApp::new().await;
    app.create_order("alice", json!([widget(1)])).await;

    let response = app
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("orders_created_total"));
    assert!(text.contains("order_creation_duration_seconds"));
}
