//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::ProductId;
use event_bus::RetryPolicy;
use orders::CircuitBreakerConfig;

/// Output format of the `fmt` tracing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server and saga configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` — bind address (default: `"0.0.0.0"`)
/// - `PORT` — listen port (default: `3000`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT` — `pretty` or `json` (default: `pretty`)
/// - `DATABASE_URL` — Postgres connection string; in-memory stores when unset
/// - `BUS_PARTITIONS` — partitions per subscription (default: `4`)
/// - `RETRY_BASE_DELAY_MS` / `RETRY_MAX_DELAY_MS` — consumer backoff (default: `1000` / `10000`)
/// - `FAILED_EVENT_MAX_RETRIES` — manual replay budget (default: `3`)
/// - `BREAKER_WINDOW_SIZE`, `BREAKER_MINIMUM_CALLS`, `BREAKER_FAILURE_RATE`,
///   `BREAKER_OPEN_SECS`, `BREAKER_HALF_OPEN_CALLS` — reservation breaker
/// - `PAYMENT_SUCCESS_RATE` — approval share of the simulated gateway (default: `0.9`)
/// - `INVENTORY_SEED` — initial stock as `SKU=qty,SKU=qty`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub bus_partitions: usize,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub failed_event_max_retries: i32,
    pub breaker: CircuitBreakerConfig,
    pub payment_success_rate: f64,
    pub inventory_seed: Vec<(ProductId, i64)>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "PORT").unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse_var(&lookup, "LOG_FORMAT").unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            bus_partitions: parse_var(&lookup, "BUS_PARTITIONS")
                .unwrap_or(defaults.bus_partitions),
            retry_base_delay: parse_var(&lookup, "RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            retry_max_delay: parse_var(&lookup, "RETRY_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_max_delay),
            failed_event_max_retries: parse_var(&lookup, "FAILED_EVENT_MAX_RETRIES")
                .unwrap_or(defaults.failed_event_max_retries),
            breaker: CircuitBreakerConfig {
                window_size: parse_var(&lookup, "BREAKER_WINDOW_SIZE")
                    .unwrap_or(defaults.breaker.window_size),
                minimum_calls: parse_var(&lookup, "BREAKER_MINIMUM_CALLS")
                    .unwrap_or(defaults.breaker.minimum_calls),
                failure_rate_threshold: parse_var(&lookup, "BREAKER_FAILURE_RATE")
                    .unwrap_or(defaults.breaker.failure_rate_threshold),
                open_duration: parse_var(&lookup, "BREAKER_OPEN_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.breaker.open_duration),
                half_open_calls: parse_var(&lookup, "BREAKER_HALF_OPEN_CALLS")
                    .unwrap_or(defaults.breaker.half_open_calls),
            },
            payment_success_rate: parse_var(&lookup, "PAYMENT_SUCCESS_RATE")
                .unwrap_or(defaults.payment_success_rate),
            inventory_seed: lookup("INVENTORY_SEED")
                .map(|raw| parse_seed(&raw))
                .unwrap_or_default(),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Consumer policy with `max_attempts` deliveries and the configured backoff.
    pub fn retry_policy(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, self.retry_base_delay, 2.0, self.retry_max_delay)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            bus_partitions: 4,
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_millis(10_000),
            failed_event_max_retries: 3,
            breaker: CircuitBreakerConfig::default(),
            payment_success_rate: 0.9,
            inventory_seed: Vec::new(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}

/// Parses `SKU-1=100,SKU-2=5`. Malformed entries are skipped with a warning.
fn parse_seed(raw: &str) -> Vec<(ProductId, i64)> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let parsed = entry.split_once('=').and_then(|(sku, qty)| {
                let qty: i64 = qty.trim().parse().ok()?;
                let sku = sku.trim();
                (!sku.is_empty() && qty >= 0).then(|| (ProductId::new(sku), qty))
            });
            if parsed.is_none() {
                tracing::warn!(entry, "ignoring malformed inventory seed entry");
            }
            parsed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_map(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
        assert_eq!(config.bus_partitions, 4);
        assert_eq!(config.failed_event_max_retries, 3);
        assert_eq!(config.breaker, CircuitBreakerConfig::default());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_empty_environment_gives_defaults() {
        let config = from_map(&[]);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.retry_max_delay, Duration::from_secs(10));
        assert!(config.inventory_seed.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = from_map(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/saga"),
            ("RETRY_BASE_DELAY_MS", "5"),
            ("BREAKER_OPEN_SECS", "30"),
            ("BREAKER_FAILURE_RATE", "0.25"),
            ("PAYMENT_SUCCESS_RATE", "1.0"),
        ]);
        assert_eq!(config.port, 8081);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/saga"));
        assert_eq!(config.retry_base_delay, Duration::from_millis(5));
        assert_eq!(config.breaker.open_duration, Duration::from_secs(30));
        assert_eq!(config.breaker.failure_rate_threshold, 0.25);
        assert_eq!(config.payment_success_rate, 1.0);
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = from_map(&[("PORT", "eighty"), ("LOG_FORMAT", "xml"), ("DATABASE_URL", "")]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_inventory_seed_parsing() {
        let seed = parse_seed("SKU-1=100, SKU-2 = 5,broken,SKU-3=-1,=4,");
        assert_eq!(
            seed,
            vec![(ProductId::new("SKU-1"), 100), (ProductId::new("SKU-2"), 5)]
        );
    }

    #[test]
    fn test_retry_policy_uses_configured_delays() {
        let config = from_map(&[("RETRY_BASE_DELAY_MS", "500"), ("RETRY_MAX_DELAY_MS", "1500")]);
        let policy = config.retry_policy(4);
        let delays: Vec<Duration> = policy.backoff().collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_millis(1000),
                Duration::from_millis(1500),
            ]
        );
    }
}
