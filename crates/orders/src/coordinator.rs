//! Order saga coordinator.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, OwnerId, Page, ProductId, Telemetry};
use event_bus::{
    EventBus, EventBusExt, HandlerError, MessageHandler, OrderCreated, SagaMessage, topics,
};

use crate::client::ReservationClient;
use crate::error::{OrderError, Result};
use crate::model::{CreateOrder, Order};
use crate::repository::OrderRepository;
use crate::status::OrderStatus;

/// Attempts for one optimistic read-modify-write before giving up.
const MAX_WRITE_ATTEMPTS: u32 = 5;

/// Drives the order side of the choreographed saga.
///
/// Creation is synchronous up to `order-created`: the order is persisted,
/// every line is reserved, and the rest of the saga continues through the
/// bus. Lines reserved before a failing one are released again so a
/// rejected order holds no stock.
pub struct OrderSagaCoordinator {
    repository: Arc<dyn OrderRepository>,
    reservations: Arc<dyn ReservationClient>,
    bus: Arc<dyn EventBus>,
    telemetry: Arc<dyn Telemetry>,
}

impl OrderSagaCoordinator {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        reservations: Arc<dyn ReservationClient>,
        bus: Arc<dyn EventBus>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            repository,
            reservations,
            bus,
            telemetry,
        }
    }

    /// Creates an order and reserves its stock.
    ///
    /// Returns the order in `INVENTORY_RESERVED`. When a line cannot be
    /// reserved the order is stored as `CANCELLED` and the rejection is
    /// returned.
    #[tracing::instrument(skip_all, fields(owner = %request.owner, lines = request.lines.len()))]
    pub async fn create_order(&self, request: CreateOrder) -> Result<Order> {
        let started = Instant::now();
        request.validate()?;

        let order = self.repository.insert(&Order::new(request)?).await?;
        tracing::info!(order_id = %order.id, total = %order.total, "order created");

        let result = self.reserve_lines(&order).await;
        self.telemetry.record_seconds(
            "order_creation_duration_seconds",
            started.elapsed().as_secs_f64(),
        );

        match result {
            Ok(order) => {
                self.telemetry.increment("orders_created_total", &[]);
                Ok(order)
            }
            Err(err) => {
                let reason = match &err {
                    OrderError::InsufficientStock(_) => "insufficient_stock",
                    OrderError::Reservation(_) => "reservation_error",
                    _ => "internal",
                };
                self.telemetry
                    .increment("orders_rejected_total", &[("reason", reason)]);
                Err(err)
            }
        }
    }

    /// Runs [`Self::create_order`] on its own task.
    ///
    /// Reservation and compensation finish even when the caller stops
    /// waiting, so an abandoned request never leaves stock reserved for a
    /// `PENDING` order.
    pub async fn submit_order(self: &Arc<Self>, request: CreateOrder) -> Result<Order> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.create_order(request).await })
            .await
            .map_err(|err| OrderError::Interrupted(err.to_string()))?
    }

    async fn reserve_lines(&self, order: &Order) -> Result<Order> {
        let mut reserved = Vec::with_capacity(order.lines.len());

        for (index, line) in order.lines.iter().enumerate() {
            let failure = match self
                .reservations
                .reserve(order.id, &line.product_id, line.quantity)
                .await
            {
                Ok(response) if response.success => {
                    reserved.push(index);
                    continue;
                }
                Ok(response) => {
                    tracing::warn!(
                        order_id = %order.id,
                        product_id = %line.product_id,
                        quantity = line.quantity,
                        message = %response.message,
                        "reservation rejected"
                    );
                    OrderError::InsufficientStock(line.product_id.clone())
                }
                Err(err) => {
                    tracing::error!(
                        order_id = %order.id,
                        product_id = %line.product_id,
                        error = %err,
                        "reservation call failed"
                    );
                    OrderError::Reservation(err)
                }
            };

            self.compensate(order, &reserved).await;
            self.modify(order.id, |o| Ok(o.reject())).await?;
            tracing::info!(order_id = %order.id, "order cancelled after reservation failure");
            return Err(failure);
        }

        let order = self
            .modify(order.id, |o| Ok(o.mark_inventory_reserved()))
            .await?;
        tracing::info!(order_id = %order.id, "inventory reserved for every line");

        let event = SagaMessage::OrderCreated(OrderCreated {
            order_id: order.id,
            owner: order.owner.clone(),
            total_amount: order.total,
            items: order.line_items(),
        });
        if let Err(err) = self.bus.publish_event(&event).await {
            tracing::error!(
                order_id = %order.id,
                error = %err,
                "CRITICAL: order committed but order-created not published"
            );
            self.telemetry
                .increment("publish_failures_total", &[("topic", topics::ORDER_CREATED)]);
        }

        Ok(order)
    }

    /// Releases the given lines. A failed release is logged and counted,
    /// and the remaining lines are still released.
    async fn compensate(&self, order: &Order, reserved: &[usize]) {
        for &index in reserved {
            let line = &order.lines[index];
            match self
                .reservations
                .release(order.id, &line.product_id, line.quantity)
                .await
            {
                Ok(true) => {
                    tracing::info!(
                        order_id = %order.id,
                        product_id = %line.product_id,
                        quantity = line.quantity,
                        "compensating release applied"
                    );
                    self.telemetry.increment("orders_compensations_total", &[]);
                }
                Ok(false) => {
                    tracing::error!(
                        order_id = %order.id,
                        product_id = %line.product_id,
                        "compensating release found nothing reserved"
                    );
                    self.telemetry
                        .increment("orders_compensation_failures_total", &[]);
                }
                Err(err) => {
                    tracing::error!(
                        order_id = %order.id,
                        product_id = %line.product_id,
                        quantity = line.quantity,
                        error = %err,
                        "CRITICAL: compensating release failed, stock stays reserved"
                    );
                    self.telemetry
                        .increment("orders_compensation_failures_total", &[]);
                }
            }
        }
    }

    /// Loads the order, applies `change` and writes it back if `change`
    /// reports a modification. Version conflicts re-read and retry.
    async fn modify<F>(&self, id: OrderId, mut change: F) -> Result<Order>
    where
        F: FnMut(&mut Order) -> Result<bool> + Send,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut order = self
                .repository
                .get(id)
                .await?
                .ok_or(OrderError::NotFound(id))?;

            if !change(&mut order)? {
                return Ok(order);
            }
            order.updated_at = Utc::now();

            match self.repository.update(&order).await {
                Err(OrderError::ConcurrencyConflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::warn!(order_id = %id, attempt, "version conflict, retrying");
                }
                other => return other,
            }
        }
    }

    pub async fn get_order(&self, id: OrderId) -> Result<Order> {
        self.repository
            .get(id)
            .await?
            .ok_or(OrderError::NotFound(id))
    }

    pub async fn list_orders(&self, owner: &OwnerId, page: Page) -> Result<Vec<Order>> {
        self.repository.list_by_owner(owner, page).await
    }

    /// Cancels an order on behalf of its owner.
    ///
    /// Stock already reserved or deducted is left as it is.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, id: OrderId, owner: &OwnerId) -> Result<Order> {
        let order = self
            .modify(id, |o| {
                if o.owner != *owner {
                    return Err(OrderError::NotOwner(id));
                }
                o.cancel()
            })
            .await?;
        tracing::info!(order_id = %id, "order cancelled by owner");
        self.telemetry.increment("orders_cancelled_total", &[]);
        Ok(order)
    }

    async fn record_payment(&self, id: OrderId, outcome: OrderStatus) -> Result<()> {
        let mut applied = false;
        let order = self
            .modify(id, |o| {
                applied = o.record_payment(outcome);
                Ok(applied)
            })
            .await?;

        if applied {
            tracing::info!(order_id = %id, status = %outcome, "payment outcome recorded");
        } else {
            tracing::warn!(
                order_id = %id,
                status = %order.status,
                outcome = %outcome,
                "payment outcome ignored in current status"
            );
        }
        Ok(())
    }

    async fn confirm_line(&self, id: OrderId, product_id: &ProductId, quantity: u32) -> Result<()> {
        let mut applied = false;
        self.modify(id, |o| {
            applied = o.confirm_line(product_id, quantity);
            Ok(applied)
        })
        .await?;

        if !applied {
            tracing::warn!(
                order_id = %id,
                %product_id,
                quantity,
                "no unconfirmed line matches reservation"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for OrderSagaCoordinator {
    #[tracing::instrument(skip_all, fields(topic = message.topic(), order_id = %message.order_id()))]
    async fn handle(&self, message: &SagaMessage) -> std::result::Result<(), HandlerError> {
        let result = match message {
            SagaMessage::PaymentCompleted(event) => {
                self.record_payment(event.order_id, OrderStatus::PaymentCompleted)
                    .await
            }
            SagaMessage::PaymentFailed(event) => {
                self.record_payment(event.order_id, OrderStatus::PaymentFailed)
                    .await
            }
            SagaMessage::InventoryReserved(event) => {
                self.confirm_line(event.order_id, &event.product_id, event.quantity)
                    .await
            }
            other => return Err(HandlerError::Unsupported(other.topic().to_string())),
        };
        result.map_err(HandlerError::processing)
    }
}
