//! Synchronous reservation entry point called by the order service.

use std::sync::Arc;

use common::{OrderId, ProductId, Telemetry};
use event_bus::{EventBus, EventBusExt, InventoryReserved, SagaMessage};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::ledger::StockLedger;
use crate::model::StockLevel;

pub const MSG_RESERVED: &str = "Stock reserved";
pub const MSG_INSUFFICIENT: &str = "Insufficient stock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStockResponse {
    pub success: bool,
    pub message: String,
}

impl ReserveStockResponse {
    fn reserved() -> Self {
        Self {
            success: true,
            message: MSG_RESERVED.to_string(),
        }
    }

    fn insufficient() -> Self {
        Self {
            success: false,
            message: MSG_INSUFFICIENT.to_string(),
        }
    }
}

pub struct ReservationGateway {
    ledger: Arc<dyn StockLedger>,
    bus: Arc<dyn EventBus>,
    telemetry: Arc<dyn Telemetry>,
}

impl ReservationGateway {
    pub fn new(
        ledger: Arc<dyn StockLedger>,
        bus: Arc<dyn EventBus>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            ledger,
            bus,
            telemetry,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn check_stock(&self, product_id: &ProductId) -> Result<StockLevel, GatewayError> {
        let record = self
            .ledger
            .get(product_id)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "stock check failed");
                GatewayError::Internal
            })?
            .ok_or_else(|| GatewayError::NotFound(product_id.clone()))?;

        Ok(StockLevel::from(&record))
    }

    /// Reserves `quantity` units for one order line.
    ///
    /// Insufficient stock, including an unknown product, is a normal
    /// `success: false` answer. On success an `inventory-reserved` event is
    /// published; failing to publish it does not undo the reservation.
    #[tracing::instrument(skip_all, fields(%order_id, %product_id, quantity))]
    pub async fn reserve_stock(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReserveStockResponse, GatewayError> {
        if quantity == 0 {
            return Err(GatewayError::InvalidQuantity);
        }

        let reserved = self
            .ledger
            .reserve(product_id, quantity)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "reservation failed");
                GatewayError::Internal
            })?;

        if !reserved {
            tracing::warn!(quantity, "insufficient stock");
            self.telemetry
                .increment("inventory_reservations_insufficient_total", &[]);
            return Ok(ReserveStockResponse::insufficient());
        }

        tracing::info!(quantity, "stock reserved");
        self.telemetry
            .increment("inventory_reservations_success_total", &[]);

        let event = SagaMessage::InventoryReserved(InventoryReserved {
            order_id,
            product_id: product_id.clone(),
            quantity,
        });
        if let Err(err) = self.bus.publish_event(&event).await {
            tracing::error!(error = %err, "CRITICAL: reservation committed but inventory-reserved not published");
            self.telemetry.increment(
                "publish_failures_total",
                &[("topic", event_bus::topics::INVENTORY_RESERVED)],
            );
        }

        Ok(ReserveStockResponse::reserved())
    }

    /// Returns units reserved for an order line that will not proceed.
    #[tracing::instrument(skip_all, fields(%order_id, %product_id, quantity))]
    pub async fn release_stock(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool, GatewayError> {
        if quantity == 0 {
            return Err(GatewayError::InvalidQuantity);
        }

        let released = self
            .ledger
            .release(product_id, quantity)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "release failed");
                GatewayError::Internal
            })?;

        if released {
            tracing::info!(quantity, "reservation released");
            self.telemetry
                .increment("inventory_reservations_released_total", &[]);
        } else {
            tracing::warn!(quantity, "nothing reserved to release");
        }
        Ok(released)
    }
}
