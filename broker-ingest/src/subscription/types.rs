//! Subscription records and errors

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trading_common::data::{DataType, InstrumentKey};
use trading_common::error::{ErrorCategory, ErrorClassification};
use uuid::Uuid;

/// Request to stream data for one instrument from one broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub key: InstrumentKey,
    pub data_types: Vec<DataType>,
    pub broker_id: String,
    /// Earliest data of interest, if the source supports it
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub settings: serde_json::Map<String, serde_json::Value>,
    pub is_active: bool,
}

impl Subscription {
    pub fn new(key: InstrumentKey, broker_id: impl Into<String>, data_types: Vec<DataType>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            data_types,
            broker_id: broker_id.into(),
            start_date: None,
            settings: serde_json::Map::new(),
            is_active: false,
        }
    }

    pub fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.start_date = Some(start_date);
        self
    }

    pub fn wants(&self, data_type: DataType) -> bool {
        self.data_types.contains(&data_type)
    }
}

/// Lifecycle status of a subscription record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Inactive,
    Error,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Inactive => "inactive",
            SubscriptionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Tracked state of one subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub subscription: Subscription,
    pub status: SubscriptionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_data_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub data_received: u64,
}

impl SubscriptionInfo {
    pub(crate) fn pending(subscription: Subscription) -> Self {
        let now = Utc::now();
        Self {
            subscription,
            status: SubscriptionStatus::Pending,
            created_at: now,
            updated_at: now,
            last_data_at: None,
            last_error: None,
            data_received: 0,
        }
    }

    pub(crate) fn set_status(&mut self, status: SubscriptionStatus) {
        self.status = status;
        self.subscription.is_active = status == SubscriptionStatus::Active;
        self.updated_at = Utc::now();
    }

    pub(crate) fn set_error(&mut self, error: impl fmt::Display) {
        self.last_error = Some(error.to_string());
        self.set_status(SubscriptionStatus::Error);
    }
}

/// Subscription error types
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SubscriptionError {
    #[error("Subscription failed for {key}: {reason}")]
    Failed { key: String, reason: String },

    #[error("Subscription limit reached ({limit})")]
    LimitExceeded { limit: usize },

    #[error("Broker not connected")]
    NotConnected,

    /// One entry per failed instrument key with its cause
    #[error("{operation} failed for {} instrument(s): {}", .failures.len(), format_failures(.failures))]
    Batch {
        operation: &'static str,
        failures: Vec<(String, String)>,
    },
}

impl SubscriptionError {
    pub fn failed(key: &InstrumentKey, reason: impl Into<String>) -> Self {
        SubscriptionError::Failed {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Keys of every failed instrument in a batch error
    pub fn failed_keys(&self) -> Vec<&str> {
        match self {
            SubscriptionError::Batch { failures, .. } => {
                failures.iter().map(|(key, _)| key.as_str()).collect()
            }
            SubscriptionError::Failed { key, .. } => vec![key.as_str()],
            _ => Vec::new(),
        }
    }
}

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(key, reason)| format!("{}: {}", key, reason))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ErrorClassification for SubscriptionError {
    fn category(&self) -> ErrorCategory {
        match self {
            SubscriptionError::LimitExceeded { .. } => ErrorCategory::ResourceExhausted,
            _ => ErrorCategory::Transient,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            SubscriptionError::LimitExceeded { .. } => None,
            SubscriptionError::NotConnected => Some(Duration::from_secs(1)),
            _ => Some(Duration::from_millis(500)),
        }
    }
}
