//! PostgreSQL integration tests for the stock ledger.
//!
//! These tests use a shared PostgreSQL container and need Docker.
//! Run with:
//!
//! ```bash
//! cargo test -p inventory --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use common::ProductId;
use inventory::{LedgerError, PostgresStockLedger, StockLedger};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_saga_tables.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_ledger() -> PostgresStockLedger {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE stock_records")
        .execute(&pool)
        .await
        .unwrap();

    PostgresStockLedger::new(pool)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn reserve_release_scenario() {
    let ledger = get_test_ledger().await;
    let sku = ProductId::new("SKU-1");
    ledger.create_record(&sku, 10).await.unwrap();

    let (a, b) = tokio::join!(ledger.reserve(&sku, 6), ledger.reserve(&sku, 6));
    assert!(a.unwrap() ^ b.unwrap());
    assert_eq!(ledger.get(&sku).await.unwrap().unwrap().reserved, 6);

    assert!(!ledger.reserve(&sku, 5).await.unwrap());
    assert!(ledger.release(&sku, 6).await.unwrap());
    assert_eq!(ledger.get(&sku).await.unwrap().unwrap().reserved, 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn concurrent_reservations_never_oversell() {
    let ledger = Arc::new(get_test_ledger().await);
    let sku = ProductId::new("SKU-HOT");
    ledger.create_record(&sku, 20).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let ledger = ledger.clone();
        let sku = sku.clone();
        tasks.push(tokio::spawn(async move {
            ledger.reserve(&sku, 1).await.unwrap()
        }));
    }
    let mut granted = 0;
    for task in tasks {
        if task.await.unwrap() {
            granted += 1;
        }
    }

    assert_eq!(granted, 20);
    let record = ledger.get(&sku).await.unwrap().unwrap();
    assert_eq!(record.reserved, 20);
    assert_eq!(record.available(), 0);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn confirm_deduction_requires_reservation() {
    let ledger = get_test_ledger().await;
    let sku = ProductId::new("SKU-2");
    ledger.create_record(&sku, 5).await.unwrap();

    assert!(!ledger.confirm_deduction(&sku, 1).await.unwrap());
    assert!(ledger.reserve(&sku, 2).await.unwrap());
    assert!(ledger.confirm_deduction(&sku, 2).await.unwrap());

    let record = ledger.get(&sku).await.unwrap().unwrap();
    assert_eq!((record.quantity, record.reserved), (3, 0));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn create_record_twice_conflicts() {
    let ledger = get_test_ledger().await;
    let sku = ProductId::new("SKU-3");
    ledger.create_record(&sku, 5).await.unwrap();
    let err = ledger.create_record(&sku, 5).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyExists(_)));
    assert!(ledger.get(&ProductId::new("NOPE")).await.unwrap().is_none());
}
