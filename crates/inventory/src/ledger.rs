use async_trait::async_trait;
use common::ProductId;

use crate::error::LedgerError;
use crate::model::StockRecord;

/// Atomic conditional mutations on stock records.
///
/// Each mutation is a single check-and-write on one row and returns whether
/// the row matched. None of them is idempotent: callers must make sure each
/// business event is applied once.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Adds `amount` to `reserved` if at least `amount` units are available.
    async fn reserve(&self, product_id: &ProductId, amount: u32) -> Result<bool, LedgerError>;

    /// Removes `amount` from `reserved` if at least that much is reserved.
    async fn release(&self, product_id: &ProductId, amount: u32) -> Result<bool, LedgerError>;

    /// Removes `amount` from both `quantity` and `reserved` if at least that
    /// much is reserved.
    async fn confirm_deduction(
        &self,
        product_id: &ProductId,
        amount: u32,
    ) -> Result<bool, LedgerError>;

    async fn get(&self, product_id: &ProductId) -> Result<Option<StockRecord>, LedgerError>;

    /// Onboards a product with `quantity` units and nothing reserved.
    async fn create_record(
        &self,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<StockRecord, LedgerError>;
}

pub(crate) fn validate_amount(amount: u32) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}
