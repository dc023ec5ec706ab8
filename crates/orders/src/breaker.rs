//! Circuit breaker around the reservation call.
//!
//! The breaker keeps the outcome of the last `window_size` calls. Once at
//! least `minimum_calls` are recorded and the failure rate reaches the
//! threshold it opens: calls are refused without touching the gateway until
//! `open_duration` has passed. It then admits `half_open_calls` trial calls;
//! if they all succeed it closes, and the first failing one opens it again.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, ProductId, Telemetry};
use inventory::ReserveStockResponse;
use tokio::time::Instant;

use crate::client::ReservationClient;
use crate::error::ReservationError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    pub window_size: usize,
    pub minimum_calls: usize,
    /// Failure rate in `0.0..=1.0` at which the breaker opens.
    pub failure_rate_threshold: f64,
    pub open_duration: Duration,
    pub half_open_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            minimum_calls: 5,
            failure_rate_threshold: 0.5,
            open_duration: Duration::from_secs(10),
            half_open_calls: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
enum Phase {
    Closed,
    Open { until: Instant },
    HalfOpen { admitted: usize, succeeded: usize },
}

#[derive(Debug)]
struct State {
    phase: Phase,
    /// Bumped on every phase change; outcomes of calls admitted in an
    /// earlier half-open phase are ignored.
    generation: u64,
    /// `true` marks a failed call.
    window: VecDeque<bool>,
}

/// Admission to one guarded call.
///
/// Report the outcome with [`Permit::success`] or [`Permit::failure`]. A
/// permit dropped without an outcome, as happens when the caller's future
/// is cancelled, hands its half-open slot back.
#[must_use = "report the outcome of the call on the permit"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Permit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.generation);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.generation);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandoned(self.generation);
        }
    }
}

pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    state: Mutex<State>,
    telemetry: Arc<dyn Telemetry>,
}

impl CircuitBreaker {
    pub fn new(
        name: &'static str,
        config: CircuitBreakerConfig,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            name,
            config: CircuitBreakerConfig {
                window_size: config.window_size.max(1),
                minimum_calls: config.minimum_calls.max(1),
                half_open_calls: config.half_open_calls.max(1),
                ..config
            },
            state: Mutex::new(State {
                phase: Phase::Closed,
                generation: 0,
                window: VecDeque::new(),
            }),
            telemetry,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        match self.lock().phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { until } if Instant::now() >= until => CircuitState::HalfOpen,
            Phase::Open { .. } => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    /// Asks permission for one call. None while the circuit is open or all
    /// half-open slots are taken.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut guard = self.lock();
        let state: &mut State = &mut guard;
        let admitted = match &mut state.phase {
            Phase::Closed => true,
            Phase::Open { until } => {
                if Instant::now() < *until {
                    return None;
                }
                tracing::info!(breaker = self.name, "circuit half-open, admitting trial calls");
                state.phase = Phase::HalfOpen {
                    admitted: 1,
                    succeeded: 0,
                };
                state.generation += 1;
                true
            }
            Phase::HalfOpen { admitted, .. } => {
                if *admitted >= self.config.half_open_calls {
                    return None;
                }
                *admitted += 1;
                true
            }
        };
        admitted.then(|| Permit {
            breaker: self,
            generation: state.generation,
            settled: false,
        })
    }

    fn on_success(&self, generation: u64) {
        let mut guard = self.lock();
        let state: &mut State = &mut guard;
        let current = state.generation;
        match &mut state.phase {
            Phase::Closed => self.push(state, false),
            Phase::HalfOpen { succeeded, .. } if generation == current => {
                *succeeded += 1;
                if *succeeded >= self.config.half_open_calls {
                    tracing::info!(breaker = self.name, "circuit closed");
                    state.phase = Phase::Closed;
                    state.generation += 1;
                    state.window.clear();
                    self.telemetry.increment(
                        "circuit_breaker_transitions_total",
                        &[("breaker", self.name), ("to", CircuitState::Closed.as_str())],
                    );
                }
            }
            // Admitted before the breaker opened, or in an earlier half-open phase.
            Phase::HalfOpen { .. } | Phase::Open { .. } => {}
        }
    }

    fn on_failure(&self, generation: u64) {
        let mut guard = self.lock();
        let state: &mut State = &mut guard;
        match state.phase {
            Phase::Closed => self.push(state, true),
            Phase::HalfOpen { .. } if generation == state.generation => self.trip(state),
            Phase::HalfOpen { .. } | Phase::Open { .. } => {}
        }
    }

    fn on_abandoned(&self, generation: u64) {
        let mut guard = self.lock();
        let state: &mut State = &mut guard;
        let current = state.generation;
        if let Phase::HalfOpen { admitted, .. } = &mut state.phase {
            if generation == current {
                *admitted = admitted.saturating_sub(1);
                tracing::debug!(breaker = self.name, "half-open call abandoned, slot freed");
            }
        }
    }

    fn push(&self, state: &mut State, failed: bool) {
        state.window.push_back(failed);
        while state.window.len() > self.config.window_size {
            state.window.pop_front();
        }

        let calls = state.window.len();
        if calls < self.config.minimum_calls {
            return;
        }
        let failures = state.window.iter().filter(|failed| **failed).count();
        let rate = failures as f64 / calls as f64;
        if rate >= self.config.failure_rate_threshold {
            tracing::warn!(breaker = self.name, failures, calls, "failure rate exceeded");
            self.trip(state);
        }
    }

    fn trip(&self, state: &mut State) {
        tracing::warn!(
            breaker = self.name,
            open_for_ms = self.config.open_duration.as_millis() as u64,
            "circuit opened"
        );
        state.phase = Phase::Open {
            until: Instant::now() + self.config.open_duration,
        };
        state.generation += 1;
        state.window.clear();
        self.telemetry.increment(
            "circuit_breaker_transitions_total",
            &[("breaker", self.name), ("to", CircuitState::Open.as_str())],
        );
    }
}

/// Guards `reserve` of any [`ReservationClient`] with a [`CircuitBreaker`].
///
/// An "Insufficient stock" answer is a successful call. `release` is passed
/// through unguarded so compensation is attempted even while the breaker
/// is open.
pub struct CircuitBreakingReservationClient<C> {
    inner: C,
    breaker: Arc<CircuitBreaker>,
}

impl<C: ReservationClient> CircuitBreakingReservationClient<C> {
    pub fn new(inner: C, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait]
impl<C: ReservationClient> ReservationClient for CircuitBreakingReservationClient<C> {
    async fn reserve(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<ReserveStockResponse, ReservationError> {
        let Some(permit) = self.breaker.try_acquire() else {
            return Err(ReservationError::Unavailable);
        };

        let result = self.inner.reserve(order_id, product_id, quantity).await;
        match &result {
            Ok(_) => permit.success(),
            Err(_) => permit.failure(),
        }
        result
    }

    async fn release(
        &self,
        order_id: OrderId,
        product_id: &ProductId,
        quantity: u32,
    ) -> Result<bool, ReservationError> {
        self.inner.release(order_id, product_id, quantity).await
    }
}
