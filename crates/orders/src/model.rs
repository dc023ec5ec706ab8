use chrono::{DateTime, Utc};
use common::{Money, OrderId, OwnerId, ProductId, Version};
use event_bus::OrderLineItem;
use serde::{Deserialize, Serialize};

use crate::error::{OrderError, Result};
use crate::status::OrderStatus;

/// A line requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Input of [`crate::OrderSagaCoordinator::create_order`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub owner: OwnerId,
    pub lines: Vec<NewOrderLine>,
    #[serde(default)]
    pub shipping_address: Option<String>,
}

impl CreateOrder {
    /// Checks the request before anything is persisted.
    pub fn validate(&self) -> Result<()> {
        if self.lines.is_empty() {
            return Err(OrderError::Validation(
                "order must contain at least one line".to_string(),
            ));
        }
        for line in &self.lines {
            if line.quantity == 0 {
                return Err(OrderError::Validation(format!(
                    "quantity for {} must be positive",
                    line.product_id
                )));
            }
            if !line.unit_price.is_positive() {
                return Err(OrderError::Validation(format!(
                    "unit price for {} must be positive",
                    line.product_id
                )));
            }
        }
        self.total()?;
        Ok(())
    }

    /// Sum of the line subtotals. Fails when an amount does not fit in
    /// `i64` cents.
    pub fn total(&self) -> Result<Money> {
        self.lines.iter().try_fold(Money::zero(), |total, line| {
            total
                .checked_add(line_subtotal(line)?)
                .ok_or_else(|| OrderError::Validation("order total is too large".to_string()))
        })
    }
}

fn line_subtotal(line: &NewOrderLine) -> Result<Money> {
    line.unit_price
        .checked_multiply(line.quantity)
        .ok_or_else(|| {
            OrderError::Validation(format!("subtotal for {} is too large", line.product_id))
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub subtotal: Money,
    pub reservation_confirmed: bool,
}

impl TryFrom<NewOrderLine> for OrderLine {
    type Error = OrderError;

    fn try_from(line: NewOrderLine) -> Result<Self> {
        Ok(Self {
            subtotal: line_subtotal(&line)?,
            product_id: line.product_id,
            product_name: line.product_name,
            quantity: line.quantity,
            unit_price: line.unit_price,
            reservation_confirmed: false,
        })
    }
}

impl From<&OrderLine> for OrderLineItem {
    fn from(line: &OrderLine) -> Self {
        Self {
            product_id: line.product_id.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub owner: OwnerId,
    pub status: OrderStatus,
    pub lines: Vec<OrderLine>,
    pub total: Money,
    pub shipping_address: Option<String>,
    pub version: Version,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a `PENDING` order from a validated request.
    pub fn new(request: CreateOrder) -> Result<Self> {
        let now = Utc::now();
        let total = request.total()?;
        let lines = request
            .lines
            .into_iter()
            .map(OrderLine::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: OrderId::new(),
            owner: request.owner,
            status: OrderStatus::Pending,
            total,
            lines,
            shipping_address: request.shipping_address,
            version: Version::first(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Marks every line as held by inventory. Returns false if the order has
    /// already left `PENDING`.
    pub fn mark_inventory_reserved(&mut self) -> bool {
        if !self.status.can_reserve() {
            return false;
        }
        self.status = OrderStatus::InventoryReserved;
        true
    }

    /// Cancels after a rejected reservation. Returns false if the order has
    /// already left `PENDING`.
    pub fn reject(&mut self) -> bool {
        if !self.status.can_reserve() {
            return false;
        }
        self.status = OrderStatus::Cancelled;
        true
    }

    /// Records a payment outcome. Returns false when the status does not
    /// accept one, which keeps redelivered or late events from regressing
    /// the order.
    pub fn record_payment(&mut self, outcome: OrderStatus) -> bool {
        debug_assert!(matches!(
            outcome,
            OrderStatus::PaymentCompleted | OrderStatus::PaymentFailed
        ));
        if !self.status.can_record_payment() {
            return false;
        }
        self.status = outcome;
        true
    }

    /// Flags the first unconfirmed line matching the product and quantity.
    /// Returns false if there is none.
    pub fn confirm_line(&mut self, product_id: &ProductId, quantity: u32) -> bool {
        match self.lines.iter_mut().find(|line| {
            !line.reservation_confirmed
                && line.product_id == *product_id
                && line.quantity == quantity
        }) {
            Some(line) => {
                line.reservation_confirmed = true;
                true
            }
            None => false,
        }
    }

    /// User cancellation. Cancelling a cancelled order changes nothing.
    pub fn cancel(&mut self) -> Result<bool> {
        if self.status == OrderStatus::Cancelled {
            return Ok(false);
        }
        if !self.status.can_cancel() {
            return Err(OrderError::InvalidState {
                id: self.id,
                status: self.status,
                action: "cancel",
            });
        }
        self.status = OrderStatus::Cancelled;
        Ok(true)
    }

    pub fn line_items(&self) -> Vec<OrderLineItem> {
        self.lines.iter().map(OrderLineItem::from).collect()
    }
}
