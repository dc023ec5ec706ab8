use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::ProductId;
use tokio::sync::RwLock;

use crate::error::LedgerError;
use crate::ledger::{StockLedger, validate_amount};
use crate::model::StockRecord;

/// In-memory stock ledger.
///
/// The condition check and the write happen under one write lock, which
/// stands in for the row lock the database takes on a conditional update.
#[derive(Clone, Default)]
pub struct InMemoryStockLedger {
    records: Arc<RwLock<HashMap<ProductId, StockRecord>>>,
    fail_on_write: Arc<AtomicBool>,
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger pre-loaded with `(product, quantity)` pairs.
    pub fn with_stock<I, P>(stock: I) -> Self
    where
        I: IntoIterator<Item = (P, i64)>,
        P: Into<ProductId>,
    {
        let records = stock
            .into_iter()
            .map(|(product, quantity)| {
                let product_id = product.into();
                (product_id.clone(), StockRecord::new(product_id, quantity))
            })
            .collect();
        Self {
            records: Arc::new(RwLock::new(records)),
            fail_on_write: Arc::default(),
        }
    }

    /// Makes every mutation fail as if the database were unreachable.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    async fn mutate<F>(&self, product_id: &ProductId, amount: u32, apply: F) -> Result<bool, LedgerError>
    where
        F: FnOnce(&mut StockRecord, i64) -> bool,
    {
        validate_amount(amount)?;
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut records = self.records.write().await;
        let Some(record) = records.get_mut(product_id) else {
            return Ok(false);
        };
        let applied = apply(record, amount as i64);
        if applied {
            record.updated_at = Utc::now();
        }
        Ok(applied)
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn reserve(&self, product_id: &ProductId, amount: u32) -> Result<bool, LedgerError> {
        self.mutate(product_id, amount, |record, amount| {
            if record.quantity - record.reserved >= amount {
                record.reserved += amount;
                true
            } else {
                false
            }
        })
        .await
    }

    async fn release(&self, product_id: &ProductId, amount: u32) -> Result<bool, LedgerError> {
        self.mutate(product_id, amount, |record, amount| {
            if record.reserved >= amount {
                record.reserved -= amount;
                true
            } else {
                false
            }
        })
        .await
    }

    async fn confirm_deduction(
        &self,
        product_id: &ProductId,
        amount: u32,
    ) -> Result<bool, LedgerError> {
        self.mutate(product_id, amount, |record, amount| {
            if record.reserved >= amount {
                record.quantity -= amount;
                record.reserved -= amount;
                true
            } else {
                false
            }
        })
        .await
    }

    async fn get(&self, product_id: &ProductId) -> Result<Option<StockRecord>, LedgerError> {
        Ok(self.records.read().await.get(product_id).cloned())
    }

    async fn create_record(
        &self,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<StockRecord, LedgerError> {
        if quantity < 0 {
            return Err(LedgerError::InvalidQuantity(quantity));
        }
        let mut records = self.records.write().await;
        if records.contains_key(product_id) {
            return Err(LedgerError::AlreadyExists(product_id.clone()));
        }
        let record = StockRecord::new(product_id.clone(), quantity);
        records.insert(product_id.clone(), record.clone());
        Ok(record)
    }
}
