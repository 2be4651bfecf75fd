//! Configuration handling for sqlm.
//!
//! [`PoolConfig`] carries the pool knobs used by the library; [`Config`] is
//! the CLI surface, read from arguments and environment variables.

use crate::models::{DatabaseType, Value};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// Pool configuration defaults
pub const DEFAULT_MAX_OPEN_CONNECTIONS: u32 = 25;
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 300;
pub const DEFAULT_PING_TIMEOUT_SECS: u64 = 5;

pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 30;

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Cap on open connections; idle connections are kept up to the same cap.
    pub max_open_connections: u32,
    /// Maximum connection age in milliseconds; 0 disables recycling by age.
    pub max_lifetime_ms: u64,
    /// Upper bound on the connectivity check run when the pool is opened.
    pub ping_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open_connections: DEFAULT_MAX_OPEN_CONNECTIONS,
            max_lifetime_ms: DEFAULT_MAX_LIFETIME_SECS * 1000,
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_SECS * 1000,
        }
    }
}

impl PoolConfig {
    /// Build a config from durations. Non-zero durations shorter than a
    /// millisecond round up to one millisecond, so they never collapse to 0.
    pub fn from_durations(
        max_open_connections: u32,
        max_lifetime: Duration,
        ping_timeout: Duration,
    ) -> Self {
        Self {
            max_open_connections,
            max_lifetime_ms: millis_ceil(max_lifetime),
            ping_timeout_ms: millis_ceil(ping_timeout),
        }
    }

    pub fn max_lifetime(&self) -> Option<Duration> {
        (self.max_lifetime_ms > 0).then(|| Duration::from_millis(self.max_lifetime_ms))
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_open_connections == 0 {
            return Err("max_open_connections must be greater than 0".to_string());
        }
        if self.ping_timeout_ms == 0 {
            return Err("ping_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn millis_ceil(duration: Duration) -> u64 {
    let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    if millis == 0 && !duration.is_zero() {
        1
    } else {
        millis
    }
}

/// Run one SQL statement in a serializable transaction and print the result.
#[derive(Debug, Clone, Parser)]
#[command(name = "sqlm", version, author)]
pub struct Config {
    /// Database connection URL (postgres://, mysql://, sqlite:).
    #[arg(
        short = 'd',
        long = "database",
        value_name = "URL",
        env = "SQLM_DATABASE_URL"
    )]
    pub database: String,

    /// Driver name (mysql, postgres, sqlite). Inferred from the URL when omitted.
    #[arg(long, env = "SQLM_DRIVER")]
    pub driver: Option<String>,

    /// Maximum open connections in the pool
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_OPEN_CONNECTIONS,
        env = "SQLM_MAX_CONNECTIONS"
    )]
    pub max_connections: u32,

    /// Maximum connection lifetime in seconds (0 = unlimited)
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_LIFETIME_SECS,
        env = "SQLM_MAX_LIFETIME"
    )]
    pub max_lifetime_secs: u64,

    /// Connectivity check timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_PING_TIMEOUT_SECS,
        env = "SQLM_PING_TIMEOUT"
    )]
    pub ping_timeout_secs: u64,

    /// Deadline for the whole transaction in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_STATEMENT_TIMEOUT_SECS,
        env = "SQLM_TIMEOUT"
    )]
    pub timeout_secs: u64,

    /// Positional bind parameter as a JSON literal (e.g. 42, "abc", null).
    /// Can be specified multiple times.
    #[arg(short = 'p', long = "param", value_name = "JSON")]
    pub params: Vec<String>,

    /// Run as a statement and print rows affected instead of records
    #[arg(long)]
    pub exec: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "SQLM_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SQLM_JSON_LOGS")]
    pub json_logs: bool,

    /// SQL to run
    #[arg(value_name = "SQL")]
    pub sql: String,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The driver to open, explicit or inferred from the URL scheme.
    pub fn driver_name(&self) -> Result<String, String> {
        if let Some(driver) = &self.driver {
            return Ok(driver.clone());
        }
        DatabaseType::from_connection_string(&self.database)
            .map(|db| match db {
                DatabaseType::PostgreSQL => "postgres".to_string(),
                DatabaseType::MySQL => "mysql".to_string(),
                DatabaseType::SQLite => "sqlite".to_string(),
            })
            .ok_or_else(|| {
                "Cannot infer the driver from the URL; pass --driver".to_string()
            })
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_open_connections: self.max_connections,
            max_lifetime_ms: self.max_lifetime_secs.saturating_mul(1000),
            ping_timeout_ms: self.ping_timeout_secs.saturating_mul(1000),
        }
    }

    /// Get the transaction timeout as a Duration.
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Parse the `--param` JSON literals into bind arguments.
    pub fn parse_params(&self) -> Result<Vec<Value>, String> {
        self.params
            .iter()
            .map(|raw| {
                serde_json::from_str::<serde_json::Value>(raw)
                    .map(Value::from_json)
                    .map_err(|e| format!("Invalid --param '{}': {}", raw, e))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("sqlm").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_open_connections, 25);
        assert_eq!(config.max_lifetime(), Some(Duration::from_secs(300)));
        assert_eq!(config.ping_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pool_config_validate() {
        let zero = PoolConfig {
            max_open_connections: 0,
            ..PoolConfig::default()
        };
        assert!(zero.validate().is_err());

        let no_ping = PoolConfig {
            ping_timeout_ms: 0,
            ..PoolConfig::default()
        };
        assert!(no_ping.validate().is_err());

        let unlimited = PoolConfig {
            max_lifetime_ms: 0,
            ..PoolConfig::default()
        };
        assert!(unlimited.validate().is_ok());
        assert_eq!(unlimited.max_lifetime(), None);
    }

    #[test]
    fn test_pool_config_deserialize_partial() {
        let config: PoolConfig =
            serde_json::from_str(r#"{"max_open_connections": 4}"#).unwrap();
        assert_eq!(config.max_open_connections, 4);
        assert_eq!(config.max_lifetime_ms, DEFAULT_MAX_LIFETIME_SECS * 1000);
    }

    #[test]
    fn test_from_durations_keeps_sub_second_values() {
        let config = PoolConfig::from_durations(
            4,
            Duration::from_millis(500),
            Duration::from_micros(900),
        );
        assert_eq!(config.max_lifetime(), Some(Duration::from_millis(500)));
        assert_eq!(config.ping_timeout(), Duration::from_millis(1));
        assert!(config.validate().is_ok());

        let tiny = PoolConfig::from_durations(1, Duration::from_nanos(1), Duration::from_secs(5));
        assert_eq!(tiny.max_lifetime(), Some(Duration::from_millis(1)));

        let unlimited = PoolConfig::from_durations(1, Duration::ZERO, Duration::from_secs(5));
        assert_eq!(unlimited.max_lifetime(), None);
    }

    #[test]
    fn test_cli_defaults() {
        let config = parse(&["-d", "sqlite::memory:", "SELECT 1"]);
        assert_eq!(config.sql, "SELECT 1");
        assert_eq!(config.max_connections, DEFAULT_MAX_OPEN_CONNECTIONS);
        assert_eq!(config.timeout_duration(), Duration::from_secs(30));
        assert_eq!(config.pool_config().ping_timeout(), Duration::from_secs(5));
        assert!(!config.exec);
    }

    #[test]
    fn test_driver_inference() {
        let inferred = parse(&["-d", "postgresql://localhost/app", "SELECT 1"]);
        assert_eq!(inferred.driver_name().unwrap(), "postgres");

        let explicit = parse(&["-d", "root@tcp/app", "--driver", "mysql", "SELECT 1"]);
        assert_eq!(explicit.driver_name().unwrap(), "mysql");

        let unknown = parse(&["-d", "/tmp/app.db", "SELECT 1"]);
        assert!(unknown.driver_name().is_err());
    }

    #[test]
    fn test_parse_params() {
        let config = parse(&[
            "-d",
            "sqlite::memory:",
            "-p",
            "42",
            "-p",
            "\"abc\"",
            "--param",
            "null",
            "SELECT ?, ?, ?",
        ]);
        assert_eq!(
            config.parse_params().unwrap(),
            vec![Value::Int(42), Value::Text("abc".to_string()), Value::Null]
        );

        let bad = parse(&["-d", "sqlite::memory:", "-p", "abc", "SELECT ?"]);
        assert!(bad.parse_params().unwrap_err().contains("abc"));
    }
}
