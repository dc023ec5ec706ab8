use chrono::{DateTime, Utc};
use common::ProductId;
use serde::{Deserialize, Serialize};

/// Per-product stock counters.
///
/// `reserved` units are held against orders whose payment is not settled.
/// The ledger keeps `0 <= reserved <= quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub product_id: ProductId,
    pub quantity: i64,
    pub reserved: i64,
    pub updated_at: DateTime<Utc>,
}

impl StockRecord {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
            reserved: 0,
            updated_at: Utc::now(),
        }
    }

    /// Units that can still be reserved.
    pub fn available(&self) -> i64 {
        self.quantity - self.reserved
    }
}

/// Answer to a stock check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub product_id: ProductId,
    pub available_stock: i64,
    pub in_stock: bool,
}

impl From<&StockRecord> for StockLevel {
    fn from(record: &StockRecord) -> Self {
        let available = record.available();
        Self {
            product_id: record.product_id.clone(),
            available_stock: available,
            in_stock: available > 0,
        }
    }
}
