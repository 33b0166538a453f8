//! Broker configuration
//!
//! Durations are (de)serialized as integer milliseconds.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use trading_common::error::ConfigurationError;
use trading_common::MarketType;

/// Broker family, decides which concrete implementation the factory builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerType {
    Crypto,
    Stock,
    Forex,
    Commodity,
}

impl BrokerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerType::Crypto => "crypto",
            BrokerType::Stock => "stock",
            BrokerType::Forex => "forex",
            BrokerType::Commodity => "commodity",
        }
    }

    /// Market segment the broker's instruments belong to
    pub fn market_type(&self) -> MarketType {
        match self {
            BrokerType::Crypto => MarketType::Crypto,
            BrokerType::Stock => MarketType::Stock,
            BrokerType::Forex => MarketType::Forex,
            BrokerType::Commodity => MarketType::Commodity,
        }
    }
}

impl fmt::Display for BrokerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BrokerType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crypto" => Ok(BrokerType::Crypto),
            "stock" => Ok(BrokerType::Stock),
            "forex" => Ok(BrokerType::Forex),
            "commodity" => Ok(BrokerType::Commodity),
            other => Err(ConfigurationError::invalid("broker_type", other)),
        }
    }
}

/// Configuration for a single broker instance
///
/// Validated once when the broker is created; replace the broker to change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Unique broker identifier (registry key)
    pub id: String,
    /// Human-readable name
    pub name: String,
    pub broker_type: BrokerType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Source-specific options passed through untouched
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

fn default_true() -> bool {
    true
}

/// Endpoint and reconnection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub websocket_url: Option<String>,
    #[serde(default)]
    pub rest_url: Option<String>,
    /// Connect timeout
    #[serde(default = "default_timeout", with = "duration_ms")]
    pub timeout: Duration,
    /// Delay before each reconnect attempt; zero falls back to 5s
    #[serde(default = "default_reconnect_delay", with = "duration_ms")]
    pub reconnect_delay: Duration,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Health probe interval; `None` disables probing
    #[serde(default = "default_health_check_interval", with = "option_duration_ms")]
    pub health_check_interval: Option<Duration>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_reconnect_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_health_check_interval() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            websocket_url: None,
            rest_url: None,
            timeout: default_timeout(),
            reconnect_delay: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            health_check_interval: default_health_check_interval(),
        }
    }
}

/// Channel sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Capacity of each data channel
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Records per storage write batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_buffer_size() -> usize {
    1000
}

fn default_batch_size() -> usize {
    100
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            batch_size: default_batch_size(),
        }
    }
}

/// Subscription and request rate limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_subscriptions")]
    pub max_subscriptions: usize,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_max_subscriptions() -> usize {
    100
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_burst() -> u32 {
    20
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: default_max_subscriptions(),
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
        }
    }
}

impl BrokerConfig {
    /// New enabled config with default connection, buffer and limit settings
    pub fn new(id: impl Into<String>, name: impl Into<String>, broker_type: BrokerType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            broker_type,
            enabled: true,
            connection: ConnectionConfig::default(),
            buffer: BufferConfig::default(),
            limits: LimitsConfig::default(),
            settings: serde_json::Map::new(),
        }
    }

    pub fn with_websocket_url(mut self, url: impl Into<String>) -> Self {
        self.connection.websocket_url = Some(url.into());
        self
    }

    pub fn with_rest_url(mut self, url: impl Into<String>) -> Self {
        self.connection.rest_url = Some(url.into());
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer.buffer_size = buffer_size;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check structural validity; the broker type is checked by the factory
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.id.trim().is_empty() {
            return Err(ConfigurationError::missing("id"));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::missing("name"));
        }

        let has_url = [&self.connection.websocket_url, &self.connection.rest_url]
            .iter()
            .any(|url| url.as_deref().is_some_and(|u| !u.trim().is_empty()));
        if !has_url {
            return Err(ConfigurationError::missing(
                "connection.websocket_url or connection.rest_url",
            ));
        }

        if self.limits.max_subscriptions == 0 {
            return Err(ConfigurationError::invalid(
                "limits.max_subscriptions",
                "must be greater than 0",
            ));
        }
        if self.buffer.buffer_size == 0 {
            return Err(ConfigurationError::invalid(
                "buffer.buffer_size",
                "must be greater than 0",
            ));
        }
        if self.buffer.batch_size == 0 {
            return Err(ConfigurationError::invalid(
                "buffer.batch_size",
                "must be greater than 0",
            ));
        }

        Ok(())
    }
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

pub(crate) mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
