//! Contention on a single stock record.

use std::sync::Arc;

use common::ProductId;
use inventory::{InMemoryStockLedger, StockLedger};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_oversell() {
    let ledger = Arc::new(InMemoryStockLedger::with_stock([("SKU-HOT", 25)]));

    let mut tasks = Vec::new();
    for i in 0..100u32 {
        let ledger = ledger.clone();
        tasks.push(tokio::spawn(async move {
            let amount = i % 3 + 1;
            let ok = ledger
                .reserve(&ProductId::new("SKU-HOT"), amount)
                .await
                .unwrap();
            if ok { amount as i64 } else { 0 }
        }));
    }

    let mut granted = 0;
    for task in tasks {
        granted += task.await.unwrap();
    }

    let record = ledger.get(&ProductId::new("SKU-HOT")).await.unwrap().unwrap();
    assert!(granted <= 25);
    assert_eq!(record.reserved, granted);
    assert_eq!(record.quantity, 25);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_of_two_contending_reservations_wins() {
    for _ in 0..50 {
        let ledger = Arc::new(InMemoryStockLedger::with_stock([("SKU-1", 10)]));
        let a = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.reserve(&ProductId::new("SKU-1"), 6).await.unwrap() }
        });
        let b = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.reserve(&ProductId::new("SKU-1"), 6).await.unwrap() }
        });

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a ^ b);
        let record = ledger.get(&ProductId::new("SKU-1")).await.unwrap().unwrap();
        assert_eq!(record.reserved, 6);
    }
}
