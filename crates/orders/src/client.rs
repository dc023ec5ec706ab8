//! The order service's view of the inventory reservation gateway.

use std::sync::Arc;

use async_trait::async_trait;
use common::{OrderId, ProductId};
use inventory::{ReservationGateway, ReserveStockResponse};

use crate::error::ReservationError;

/// Synchronous reservation calls made while an order is created.
#[async_trait]
pub trait ReservationClient: Send + Sync {
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReserveStockResponse, ReservationError>;

    /// Gives back units reserved for a line of an order that will not
    /// proceed. Returns false if nothing was reserved.
    async fn release(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool, ReservationError>;
}

/// Calls a gateway running in the same process.
#[derive(Clone)]
pub struct InProcessReservationClient {
    gateway: Arc<ReservationGateway>,
}

impl InProcessReservationClient {
    pub fn new(gateway: Arc<ReservationGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl ReservationClient for InProcessReservationClient {
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReserveStockResponse, ReservationError> {
        Ok(self
            .gateway
            .reserve_stock(order_id, product_id, quantity)
            .await?)
    }

    async fn release(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool, ReservationError> {
        Ok(self
            .gateway
            .release_stock(order_id, product_id, quantity)
            .await?)
    }
}
