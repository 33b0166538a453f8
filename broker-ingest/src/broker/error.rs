use std::time::Duration;

use thiserror::Error;
use trading_common::error::{ConfigurationError, ErrorCategory, ErrorClassification};

use crate::connection::ConnectionError;
use crate::subscription::SubscriptionError;

/// Broker error types
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum BrokerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error("Broker {0} is not connected")]
    NotConnected(String),

    #[error("{channel} channel at {len}/{capacity}")]
    Backpressure {
        channel: &'static str,
        len: usize,
        capacity: usize,
    },

    #[error("Broker {0} has been stopped")]
    Closed(String),

    #[error("Broker {0} already exists")]
    AlreadyExists(String),

    #[error("Broker {0} not found")]
    NotFound(String),

    /// One entry per failing broker id
    #[error("{operation} failed for {} broker(s): {}", .failures.len(), format_failures(.failures))]
    Aggregate {
        operation: &'static str,
        failures: Vec<(String, BrokerError)>,
    },
}

fn format_failures(failures: &[(String, BrokerError)]) -> String {
    failures
        .iter()
        .map(|(id, err)| format!("{}: {}", id, err))
        .collect::<Vec<_>>()
        .join("; ")
}

impl BrokerError {
    /// Ids of the brokers in an aggregated error
    pub fn failed_ids(&self) -> Vec<&str> {
        match self {
            BrokerError::Aggregate { failures, .. } => {
                failures.iter().map(|(id, _)| id.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl ErrorClassification for BrokerError {
    fn category(&self) -> ErrorCategory {
        match self {
            BrokerError::Configuration(_) => ErrorCategory::Configuration,
            BrokerError::Connection(e) => e.category(),
            BrokerError::Subscription(e) => e.category(),
            BrokerError::NotConnected(_) => ErrorCategory::Transient,
            BrokerError::Backpressure { .. } => ErrorCategory::ResourceExhausted,
            BrokerError::Closed(_) => ErrorCategory::Permanent,
            BrokerError::AlreadyExists(_) | BrokerError::NotFound(_) => ErrorCategory::Permanent,
            BrokerError::Aggregate { failures, .. } => {
                if failures.iter().all(|(_, e)| e.is_transient()) {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Permanent
                }
            }
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            BrokerError::Connection(e) => e.suggested_retry_delay(),
            BrokerError::Subscription(e) => e.suggested_retry_delay(),
            BrokerError::NotConnected(_) => Some(Duration::from_secs(1)),
            BrokerError::Backpressure { .. } => Some(Duration::from_millis(100)),
            _ => None,
        }
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
