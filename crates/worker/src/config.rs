//! Worker configuration loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// Errors raised while reading the worker configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Worker configuration.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: PostgreSQL connection string (required)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `10`)
/// - `SWEEP_INTERVAL_SECS`: seconds between expired-reservation sweeps (default: `60`)
/// - `RECONCILE_INTERVAL_SECS`: seconds between payment reconciliation passes (default: `300`)
/// - `RECONCILE_GRACE_SECS`: minimum age of a pending order before reconciliation touches it (default: `120`)
/// - `METRICS_ADDR`: Prometheus listener address (default: `"0.0.0.0:9000"`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `json` for structured output, anything else for text
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub sweep_interval: Duration,
    pub reconcile_interval: Duration,
    pub reconcile_grace: Duration,
    pub metrics_addr: SocketAddr,
    pub log_level: String,
    pub json_logs: bool,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`. Optional values that are missing
    /// or unparsable fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let max_connections = lookup("DATABASE_MAX_CONNECTIONS")
            .and_then(|v| v.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(10);

        let seconds = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map_or(Duration::from_secs(default), Duration::from_secs)
        };
        let sweep_interval = seconds("SWEEP_INTERVAL_SECS", 60);
        let reconcile_interval = seconds("RECONCILE_INTERVAL_SECS", 300);
        let reconcile_grace = seconds("RECONCILE_GRACE_SECS", 120);

        let metrics_addr = match lookup("METRICS_ADDR") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "METRICS_ADDR",
                value,
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 9000)),
        };

        Ok(Self {
            database_url,
            max_connections,
            sweep_interval,
            reconcile_interval,
            reconcile_grace,
            metrics_addr,
            log_level: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            json_logs: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
        })
    }
}
