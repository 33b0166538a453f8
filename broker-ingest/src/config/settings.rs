//! Application settings and configuration

use std::collections::HashSet;
use std::time::Duration;

use ::config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use trading_common::error::ConfigurationError;
use trading_common::logging::{LogConfig, LogFormat, TimestampFormat};

use crate::broker::BrokerConfig;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Reference data database (instruments, subscriptions, broker configs)
    pub metadata_database: DatabaseSettings,
    /// TimescaleDB database for market records
    pub timeseries_database: DatabaseSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Brokers to register at startup
    #[serde(default)]
    pub brokers: Vec<BrokerConfig>,
}

/// Database connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Seconds to wait for a pooled connection
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

impl DatabaseSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            acquire_timeout_secs: default_acquire_timeout(),
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Market records older than this are removed by retention cleanup
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Rows per insert statement, capped per table by the PostgreSQL bind limit
    #[serde(default = "default_batch_size")]
    pub batch_insert_size: usize,
    /// Limit applied to time-series reads that do not set one
    #[serde(default = "default_query_limit")]
    pub default_query_limit: usize,
}

fn default_retention_days() -> u32 {
    30
}

fn default_batch_size() -> usize {
    1000
}

fn default_query_limit() -> usize {
    1000
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            batch_insert_size: default_batch_size(),
            default_query_limit: default_query_limit(),
        }
    }
}

impl StorageSettings {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

/// Logging settings, overridden by `LOG_*` and `RUST_LOG` at init time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// "pretty", "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "local", "utc" or "none"
    #[serde(default = "default_log_timestamps")]
    pub timestamps: String,
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_timestamps() -> String {
    "local".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl LoggingSettings {
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            format: LogFormat::parse(&self.format),
            timestamps: TimestampFormat::parse(&self.timestamps),
            ..LogConfig::default()
        }
        .with_default_level(self.level.clone())
    }
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("BROKER_INGEST")
    }

    /// Load settings with a custom environment variable prefix
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_dir(), env_prefix)
    }

    /// Load settings from an explicit configuration directory
    pub fn load_from(config_dir: &str, env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Local overrides (not checked into git)
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // e.g. BROKER_INGEST__STORAGE__RETENTION_DAYS
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    fn config_dir() -> String {
        std::env::var("BROKER_INGEST_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }

    /// Check every broker entry and reject duplicate ids
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut seen = HashSet::new();
        for broker in &self.brokers {
            broker.validate()?;
            if !seen.insert(broker.id.as_str()) {
                return Err(ConfigurationError::invalid(
                    "brokers",
                    format!("duplicate broker id '{}'", broker.id),
                ));
            }
        }
        if self.storage.batch_insert_size == 0 {
            return Err(ConfigurationError::invalid(
                "storage.batch_insert_size",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Create default settings (useful for testing)
    pub fn default_settings() -> Self {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/broker_ingest".into());
        Settings {
            metadata_database: DatabaseSettings::new(url.clone()),
            timeseries_database: DatabaseSettings::new(url),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
            brokers: Vec::new(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::default_settings()
    }
}
