//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::{ConsumerConfig, RetryPolicy};
use saga_store::postgres::DEFAULT_TABLE;

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: PostgreSQL connection string; in-memory store when unset
/// - `SAGA_TABLE`: saga instance table (default: `"saga_instances"`)
/// - `SAGA_MAX_ATTEMPTS`: attempts per delivery on conflicts (default: `5`)
/// - `SAGA_TIMEOUT_MS`: per-delivery timeout in milliseconds (default: none)
/// - `SAGA_OUTBOX`: buffer publishes until commit (default: `true`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub saga_table: String,
    pub max_attempts: u32,
    pub timeout_ms: Option<u64>,
    pub use_outbox: bool,
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
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            saga_table: lookup("SAGA_TABLE").unwrap_or(defaults.saga_table),
            max_attempts: lookup("SAGA_MAX_ATTEMPTS")
                .and_then(|n| n.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            timeout_ms: lookup("SAGA_TIMEOUT_MS").and_then(|ms| ms.parse().ok()),
            use_outbox: lookup("SAGA_OUTBOX")
                .and_then(|flag| parse_flag(&flag))
                .unwrap_or(defaults.use_outbox),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the saga consumer settings.
    pub fn consumer_config(&self) -> ConsumerConfig {
        let retry = RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        };
        let config = ConsumerConfig::default()
            .with_retry(retry)
            .with_outbox(self.use_outbox);

        match self.timeout_ms {
            Some(ms) => config.with_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            saga_table: DEFAULT_TABLE.to_string(),
            max_attempts: RetryPolicy::default().max_attempts,
            timeout_ms: None,
            use_outbox: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
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
        assert_eq!(config.database_url, None);
        assert_eq!(config.saga_table, "saga_instances");
        assert_eq!(config.max_attempts, 5);
        assert!(config.use_outbox);
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
    fn test_reads_saga_settings() {
        let config = from_pairs(&[
            ("PORT", "8081"),
            ("DATABASE_URL", "postgres://localhost/sagas"),
            ("SAGA_TABLE", "test_instances"),
            ("SAGA_MAX_ATTEMPTS", "2"),
            ("SAGA_TIMEOUT_MS", "250"),
            ("SAGA_OUTBOX", "off"),
        ]);

        assert_eq!(config.port, 8081);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/sagas"));
        assert_eq!(config.saga_table, "test_instances");

        let consumer = config.consumer_config();
        assert_eq!(consumer.retry.max_attempts, 2);
        assert_eq!(consumer.timeout, Some(Duration::from_millis(250)));
        assert!(!consumer.use_outbox);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = from_pairs(&[
            ("PORT", "not-a-port"),
            ("DATABASE_URL", ""),
            ("SAGA_MAX_ATTEMPTS", "0"),
            ("SAGA_OUTBOX", "maybe"),
        ]);

        assert_eq!(config.port, 3000);
        assert_eq!(config.database_url, None);
        assert_eq!(config.max_attempts, 5);
        assert!(config.use_outbox);
        assert_eq!(config.consumer_config().timeout, None);
    }
}
