//! Observability sink injected into every service component.
//!
//! Components take an `Arc<dyn Telemetry>` at construction instead of
//! calling the `metrics` macros directly, so tests can assert on counters
//! without installing a global recorder.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// Receives counter increments and duration samples.
pub trait Telemetry: Send + Sync + 'static {
    /// Increments the counter `name` by one.
    fn increment(&self, name: &'static str, labels: &[(&'static str, &str)]);

    /// Records a duration sample in seconds.
    fn record_seconds(&self, name: &'static str, seconds: f64);
}

/// Forwards to the `metrics` facade (Prometheus in the binary).
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsTelemetry;

impl Telemetry for MetricsTelemetry {
    fn increment(&self, name: &'static str, labels: &[(&'static str, &str)]) {
        let labels: Vec<metrics::Label> = labels
            .iter()
            .map(|(key, value)| metrics::Label::new(*key, value.to_string()))
            .collect();
        metrics::counter!(name, labels).increment(1);
    }

    fn record_seconds(&self, name: &'static str, seconds: f64) {
        metrics::histogram!(name).record(seconds);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn increment(&self, _name: &'static str, _labels: &[(&'static str, &str)]) {}

    fn record_seconds(&self, _name: &'static str, _seconds: f64) {}
}

type CounterKey = (&'static str, Vec<(&'static str, String)>);

/// Records counters in memory for assertions in tests.
#[derive(Debug, Default)]
pub struct InMemoryTelemetry {
    counters: Mutex<HashMap<CounterKey, u64>>,
    samples: Mutex<HashMap<&'static str, Vec<f64>>>,
}

impl InMemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total of `name` across all label sets.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((n, _), _)| *n == name)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Total of `name` for series carrying `key=value`.
    pub fn counter_with(&self, name: &str, key: &str, value: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((n, labels), _)| {
                *n == name && labels.iter().any(|(k, v)| *k == key && v == value)
            })
            .map(|(_, v)| *v)
            .sum()
    }

    /// Number of duration samples recorded for `name`.
    pub fn sample_count(&self, name: &str) -> usize {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, Vec::len)
    }
}

impl Telemetry for InMemoryTelemetry {
    fn increment(&self, name: &'static str, labels: &[(&'static str, &str)]) {
        let labels = labels.iter().map(|(k, v)| (*k, v.to_string())).collect();
        *self
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((name, labels))
            .or_default() += 1;
    }

    fn record_seconds(&self, name: &'static str, seconds: f64) {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name)
            .or_default()
            .push(seconds);
    }
}
