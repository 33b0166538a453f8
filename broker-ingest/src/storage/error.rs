//! Storage errors

use std::time::Duration;

use thiserror::Error;
use trading_common::error::{ErrorCategory, ErrorClassification};

/// Errors raised by storage backends and the router
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} storage is not connected")]
    NotConnected(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("{}", format_aggregate(.0))]
    Aggregate(Vec<(String, StorageError)>),
}

fn format_aggregate(failures: &[(String, StorageError)]) -> String {
    let parts: Vec<String> = failures
        .iter()
        .map(|(backend, err)| format!("{}: {}", backend, err))
        .collect();
    format!("{} backend(s) failed: {}", failures.len(), parts.join("; "))
}

impl StorageError {
    /// Names of the backends inside an aggregate error
    pub fn failed_backends(&self) -> Vec<&str> {
        match self {
            StorageError::Aggregate(failures) => {
                failures.iter().map(|(name, _)| name.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl ErrorClassification for StorageError {
    fn category(&self) -> ErrorCategory {
        match self {
            StorageError::Database(err) => match err {
                sqlx::Error::PoolTimedOut => ErrorCategory::ResourceExhausted,
                sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::Protocol(_) => {
                    ErrorCategory::Transient
                }
                sqlx::Error::RowNotFound
                | sqlx::Error::ColumnNotFound(_)
                | sqlx::Error::ColumnDecode { .. }
                | sqlx::Error::Decode(_) => ErrorCategory::Permanent,
                sqlx::Error::Configuration(_) => ErrorCategory::Configuration,
                _ => ErrorCategory::Transient,
            },
            StorageError::Serialization(_) => ErrorCategory::Permanent,
            StorageError::NotConnected(_) => ErrorCategory::Transient,
            StorageError::NotFound(_) => ErrorCategory::Permanent,
            StorageError::InvalidData(_) => ErrorCategory::Permanent,
            StorageError::Migration(_) => ErrorCategory::Internal,
            StorageError::Aggregate(failures) => {
                if failures.iter().all(|(_, err)| err.is_transient()) {
                    ErrorCategory::Transient
                } else {
                    ErrorCategory::Permanent
                }
            }
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            StorageError::Database(_) => Some(Duration::from_millis(500)),
            StorageError::NotConnected(_) => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_classification() {
        let err = StorageError::from(sqlx::Error::PoolTimedOut);
        assert_eq!(err.category(), ErrorCategory::ResourceExhausted);

        let err = StorageError::from(sqlx::Error::RowNotFound);
        assert!(err.is_permanent());
        assert_eq!(
            StorageError::from(sqlx::Error::PoolClosed).suggested_retry_delay(),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_aggregate_lists_every_backend() {
        let err = StorageError::Aggregate(vec![
            ("metadata".to_string(), StorageError::NotConnected("metadata")),
            (
                "timeseries".to_string(),
                StorageError::InvalidData("bad row".to_string()),
            ),
        ]);

        assert_eq!(err.failed_backends(), vec!["metadata", "timeseries"]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 backend(s) failed"));
        assert!(msg.contains("metadata storage is not connected"));
        assert!(msg.contains("bad row"));
        assert!(err.is_permanent());
    }
}
