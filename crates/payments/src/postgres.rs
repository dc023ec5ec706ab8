use async_trait::async_trait;
use common::{Money, OrderId, OwnerId, Version};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::error::{PaymentError, Result};
use crate::model::{Payment, PaymentId};
use crate::repository::PaymentRepository;

const COLUMNS: &str = "id, order_id, owner_id, amount_cents, status, transaction_id, \
     failure_reason, version, created_at, updated_at, completed_at";

const UNIQUE_ORDER_CONSTRAINT: &str = "unique_payment_order";

/// PostgreSQL-backed payment repository.
#[derive(Clone)]
pub struct PostgresPaymentRepository {
    pool: PgPool,
}

impl PostgresPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status: String = row.try_get("status")?;
        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get("id")?),
            order_id: OrderId::from_uuid(row.try_get("order_id")?),
            owner: OwnerId::new(row.try_get::<String, _>("owner_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            status: status.parse().map_err(PaymentError::InvalidData)?,
            transaction_id: row.try_get("transaction_id")?,
            failure_reason: row.try_get("failure_reason")?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl PaymentRepository for PostgresPaymentRepository {
    async fn insert(&self, payment: &Payment) -> Result<Payment> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO payments ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#
        ))
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.owner.as_str())
        .bind(payment.amount.cents())
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .bind(&payment.failure_reason)
        .bind(payment.version.as_i64())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.completed_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(payment.clone()),
            Err(sqlx::Error::Database(db))
                if db.constraint() == Some(UNIQUE_ORDER_CONSTRAINT) =>
            {
                Err(PaymentError::DuplicateOrder(payment.order_id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM payments WHERE order_id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_payment).transpose()
    }

    async fn update(&self, payment: &Payment) -> Result<Payment> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE payments
            SET status = $3, transaction_id = $4, failure_reason = $5,
                version = version + 1, updated_at = $6, completed_at = $7
            WHERE id = $1 AND version = $2
            RETURNING {COLUMNS}
            "#
        ))
        .bind(payment.id.as_uuid())
        .bind(payment.version.as_i64())
        .bind(payment.status.as_str())
        .bind(&payment.transaction_id)
        .bind(&payment.failure_reason)
        .bind(payment.updated_at)
        .bind(payment.completed_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_payment(row),
            None => {
                let exists = sqlx::query("SELECT 1 FROM payments WHERE id = $1")
                    .bind(payment.id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?
                    .is_some();
                Err(if exists {
                    PaymentError::ConcurrencyConflict {
                        id: payment.id,
                        expected: payment.version,
                    }
                } else {
                    PaymentError::NotFound(payment.order_id)
                })
            }
        }
    }
}
