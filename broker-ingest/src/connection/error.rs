use std::time::Duration;

use thiserror::Error;
use trading_common::error::{ErrorCategory, ErrorClassification};

/// Connection error types
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConnectionError {
    #[error("Connection failed: {0}")]
    Failed(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not connected")]
    NotConnected,

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Connection lost: {0}")]
    Lost(String),

    #[error("Connection manager shut down")]
    Shutdown,
}

impl ErrorClassification for ConnectionError {
    fn category(&self) -> ErrorCategory {
        match self {
            ConnectionError::Shutdown => ErrorCategory::Permanent,
            _ => ErrorCategory::Transient,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            ConnectionError::Shutdown => None,
            ConnectionError::Timeout(_) => Some(Duration::from_secs(2)),
            _ => Some(Duration::from_secs(1)),
        }
    }
}
