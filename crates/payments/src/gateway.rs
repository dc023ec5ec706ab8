//! Card charge gateways.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::{Money, OrderId, OwnerId};
use rand::Rng;

use crate::error::PaymentError;
use crate::model::PaymentId;

/// Answer of the card network for one charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    Approved { transaction_id: String },
    Declined { reason: String },
}

/// Charges an amount against the owner's payment method.
///
/// `payment_id` is the idempotency key: a gateway that sees the same id
/// twice must not charge twice.
#[async_trait]
pub trait ChargeGateway: Send + Sync {
    async fn charge(
        &self,
        payment_id: PaymentId,
        order_id: OrderId,
        owner: &OwnerId,
        amount: Money,
    ) -> Result<ChargeOutcome, PaymentError>;
}

pub const DECLINE_REASONS: [&str; 5] = [
    "Insufficient funds",
    "Card declined",
    "Card expired",
    "Fraud detection triggered",
    "Gateway timeout",
];

/// Stand-in for a card processor: approves a configurable share of charges
/// after a random 50-200 ms delay.
#[derive(Debug, Clone)]
pub struct SimulatedChargeGateway {
    success_rate: f64,
    min_latency_ms: u64,
    max_latency_ms: u64,
}

impl SimulatedChargeGateway {
    pub fn new(success_rate: f64) -> Self {
        Self {
            success_rate: success_rate.clamp(0.0, 1.0),
            min_latency_ms: 50,
            max_latency_ms: 200,
        }
    }

    /// Overrides the simulated latency range.
    pub fn with_latency(mut self, min: Duration, max: Duration) -> Self {
        self.min_latency_ms = min.as_millis() as u64;
        self.max_latency_ms = (max.as_millis() as u64).max(self.min_latency_ms);
        self
    }

    fn roll(&self) -> (Duration, ChargeOutcome) {
        let mut rng = rand::rng();
        let latency =
            Duration::from_millis(rng.random_range(self.min_latency_ms..=self.max_latency_ms));
        let outcome = if rng.random::<f64>() < self.success_rate {
            ChargeOutcome::Approved {
                transaction_id: format!("TXN-{:012X}", rng.random::<u64>() & 0xFFFF_FFFF_FFFF),
            }
        } else {
            ChargeOutcome::Declined {
                reason: DECLINE_REASONS[rng.random_range(0..DECLINE_REASONS.len())].to_string(),
            }
        };
        (latency, outcome)
    }
}

impl Default for SimulatedChargeGateway {
    fn default() -> Self {
        Self::new(0.9)
    }
}

#[async_trait]
impl ChargeGateway for SimulatedChargeGateway {
    #[tracing::instrument(skip(self, _owner), fields(%payment_id, %order_id, %amount))]
    async fn charge(
        &self,
        payment_id: PaymentId,
        order_id: OrderId,
        _owner: &OwnerId,
        amount: Money,
    ) -> Result<ChargeOutcome, PaymentError> {
        let (latency, outcome) = self.roll();
        tokio::time::sleep(latency).await;
        tracing::debug!(?outcome, latency_ms = latency.as_millis() as u64, "charge simulated");
        Ok(outcome)
    }
}

/// Deterministic gateway for tests.
///
/// Approves with `TXN-<n>` references unless told to decline or fail, and
/// answers a repeated payment id with the outcome it gave the first time.
#[derive(Clone, Default)]
pub struct InMemoryChargeGateway {
    decline_with: Arc<Mutex<Option<String>>>,
    fail: Arc<AtomicBool>,
    charges: Arc<Mutex<HashMap<PaymentId, ChargeOutcome>>>,
}

impl InMemoryChargeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declines every new charge with `reason`, or approves again on `None`.
    pub fn set_decline(&self, reason: Option<&str>) {
        *self
            .decline_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = reason.map(str::to_string);
    }

    /// Makes the gateway unreachable.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of distinct payments charged.
    pub fn charge_count(&self) -> usize {
        self.charges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ChargeGateway for InMemoryChargeGateway {
    async fn charge(
        &self,
        payment_id: PaymentId,
        _order_id: OrderId,
        _owner: &OwnerId,
        _amount: Money,
    ) -> Result<ChargeOutcome, PaymentError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentError::Gateway("connection refused".to_string()));
        }

        let decline = self
            .decline_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut charges = self.charges.lock().unwrap_or_else(PoisonError::into_inner);
        let next = charges.len() + 1;
        let outcome = charges.entry(payment_id).or_insert_with(|| match decline {
            Some(reason) => ChargeOutcome::Declined { reason },
            None => ChargeOutcome::Approved {
                transaction_id: format!("TXN-{next}"),
            },
        });
        Ok(outcome.clone())
    }
}
