use async_trait::async_trait;
use common::ProductId;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::LedgerError;
use crate::ledger::{StockLedger, validate_amount};
use crate::model::StockRecord;

/// PostgreSQL-backed stock ledger.
///
/// Every mutation is one `UPDATE ... WHERE <condition>`; the row lock taken
/// by the update serializes concurrent callers and `rows_affected` tells
/// whether the condition held.
#[derive(Clone)]
pub struct PostgresStockLedger {
    pool: PgPool,
}

impl PostgresStockLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: PgRow) -> Result<StockRecord, LedgerError> {
        Ok(StockRecord {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            quantity: row.try_get("quantity")?,
            reserved: row.try_get("reserved")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn conditional_update(
        &self,
        sql: &'static str,
        product_id: &ProductId,
        amount: u32,
    ) -> Result<bool, LedgerError> {
        validate_amount(amount)?;
        let result = sqlx::query(sql)
            .bind(product_id.as_str())
            .bind(amount as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl StockLedger for PostgresStockLedger {
    async fn reserve(&self, product_id: &ProductId, amount: u32) -> Result<bool, LedgerError> {
        self.conditional_update(
            r#"
            UPDATE stock_records
            SET reserved = reserved + $2, updated_at = NOW()
            WHERE product_id = $1 AND quantity - reserved >= $2
            "#,
            product_id,
            amount,
        )
        .await
    }

    async fn release(&self, product_id: &ProductId, amount: u32) -> Result<bool, LedgerError> {
        self.conditional_update(
            r#"
            UPDATE stock_records
            SET reserved = reserved - $2, updated_at = NOW()
            WHERE product_id = $1 AND reserved >= $2
            "#,
            product_id,
            amount,
        )
        .await
    }

    async fn confirm_deduction(
        &self,
        product_id: &ProductId,
        amount: u32,
    ) -> Result<bool, LedgerError> {
        self.conditional_update(
            r#"
            UPDATE stock_records
            SET quantity = quantity - $2, reserved = reserved - $2, updated_at = NOW()
            WHERE product_id = $1 AND reserved >= $2
            "#,
            product_id,
            amount,
        )
        .await
    }

    async fn get(&self, product_id: &ProductId) -> Result<Option<StockRecord>, LedgerError> {
        let row = sqlx::query(
            "SELECT product_id, quantity, reserved, updated_at FROM stock_records WHERE product_id = $1",
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn create_record(
        &self,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<StockRecord, LedgerError> {
        if quantity < 0 {
            return Err(LedgerError::InvalidQuantity(quantity));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO stock_records (product_id, quantity, reserved, updated_at)
            VALUES ($1, $2, 0, NOW())
            ON CONFLICT (product_id) DO NOTHING
            RETURNING product_id, quantity, reserved, updated_at
            "#,
        )
        .bind(product_id.as_str())
        .bind(quantity)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_record(row),
            None => Err(LedgerError::AlreadyExists(product_id.clone())),
        }
    }
}
