use std::collections::HashMap;

use async_trait::async_trait;
use common::{Money, OrderId, OwnerId, Page, ProductId, Version};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{OrderError, Result};
use crate::model::{Order, OrderLine};
use crate::repository::OrderRepository;

const ORDER_COLUMNS: &str =
    "id, owner_id, status, total_cents, shipping_address, version, created_at, updated_at";

const LINE_COLUMNS: &str = "order_id, line_no, product_id, product_name, quantity, \
     unit_price_cents, subtotal_cents, reservation_confirmed";

/// PostgreSQL-backed order repository.
///
/// Orders live in `orders`, lines in `order_lines` keyed by
/// `(order_id, line_no)`. Header and lines are written in one transaction.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &PgRow, lines: Vec<OrderLine>) -> Result<Order> {
        let status: String = row.try_get("status")?;
        Ok(Order {
            id: OrderId::from_uuid(row.try_get("id")?),
            owner: OwnerId::new(row.try_get::<String, _>("owner_id")?),
            status: status.parse().map_err(OrderError::InvalidData)?,
            lines,
            total: Money::from_cents(row.try_get("total_cents")?),
            shipping_address: row.try_get("shipping_address")?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_line(row: &PgRow) -> Result<OrderLine> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderLine {
            product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
            product_name: row.try_get("product_name")?,
            quantity: u32::try_from(quantity)
                .map_err(|_| OrderError::InvalidData(format!("negative quantity {quantity}")))?,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            subtotal: Money::from_cents(row.try_get("subtotal_cents")?),
            reservation_confirmed: row.try_get("reservation_confirmed")?,
        })
    }

    /// Loads the lines of several orders, grouped by order id and sorted by
    /// line number.
    async fn load_lines(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderLine>>> {
        let rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = ANY($1) ORDER BY order_id, line_no"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut lines: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in &rows {
            let order_id: Uuid = row.try_get("order_id")?;
            lines
                .entry(order_id)
                .or_default()
                .push(Self::row_to_line(row)?);
        }
        Ok(lines)
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn insert(&self, order: &Order) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            r#"
            INSERT INTO orders ({ORDER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#
        ))
        .bind(order.id.as_uuid())
        .bind(order.owner.as_str())
        .bind(order.status.as_str())
        .bind(order.total.cents())
        .bind(&order.shipping_address)
        .bind(order.version.as_i64())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        for (line_no, line) in order.lines.iter().enumerate() {
            sqlx::query(&format!(
                r#"
                INSERT INTO order_lines ({LINE_COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#
            ))
            .bind(order.id.as_uuid())
            .bind(line_no as i32)
            .bind(line.product_id.as_str())
            .bind(&line.product_name)
            .bind(line.quantity as i32)
            .bind(line.unit_price.cents())
            .bind(line.subtotal.cents())
            .bind(line.reservation_confirmed)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(order.clone())
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut lines = self.load_lines(&[id.as_uuid()]).await?;
        Self::row_to_order(&row, lines.remove(&id.as_uuid()).unwrap_or_default()).map(Some)
    }

    async fn update(&self, order: &Order) -> Result<Order> {
        let mut tx = self.pool.begin().await?;
        let next = order.version.next();

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, shipping_address = $4, version = $5, updated_at = $6
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.version.as_i64())
        .bind(order.status.as_str())
        .bind(&order.shipping_address)
        .bind(next.as_i64())
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM orders WHERE id = $1")
                .bind(order.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
            return Err(if exists {
                OrderError::ConcurrencyConflict {
                    id: order.id,
                    expected: order.version,
                }
            } else {
                OrderError::NotFound(order.id)
            });
        }

        for (line_no, line) in order.lines.iter().enumerate() {
            sqlx::query(
                r#"
                UPDATE order_lines
                SET reservation_confirmed = $3
                WHERE order_id = $1 AND line_no = $2
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(line_no as i32)
            .bind(line.reservation_confirmed)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let mut updated = order.clone();
        updated.version = next;
        Ok(updated)
    }

    async fn list_by_owner(&self, owner: &OwnerId, page: Page) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(owner.as_str())
        .bind(page.limit() as i64)
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut lines = self.load_lines(&ids).await?;

        rows.iter()
            .zip(ids)
            .map(|(row, id)| Self::row_to_order(row, lines.remove(&id).unwrap_or_default()))
            .collect()
    }
}
