//! Error classification traits for retry logic and error handling.
//!
//! These traits allow errors to self-describe their characteristics so the
//! connection layer can decide what gets retried and what is surfaced.

use std::time::Duration;

use super::common::*;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient errors that may resolve on retry (network issues, timeouts)
    Transient,
    /// Permanent errors that won't resolve on retry (invalid input, not found)
    Permanent,
    /// Resource exhaustion errors (rate limits, full buffers)
    ResourceExhausted,
    /// Configuration errors (missing config, invalid settings)
    Configuration,
    /// Internal errors (bugs, unexpected state)
    Internal,
}

/// Trait for errors that can classify themselves for retry logic.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is transient and may succeed on retry
    fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::ResourceExhausted
        )
    }

    /// Returns true if this error is permanent and won't succeed on retry
    fn is_permanent(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Permanent | ErrorCategory::Configuration
        )
    }

    /// Suggests a delay before retrying, if applicable
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(100)),
            ErrorCategory::ResourceExhausted => Some(Duration::from_secs(1)),
            _ => None,
        }
    }

    /// Returns the maximum number of retries suggested for this error
    fn max_retries(&self) -> u32 {
        match self.category() {
            ErrorCategory::Transient => 3,
            ErrorCategory::ResourceExhausted => 5,
            _ => 0,
        }
    }
}

impl ErrorClassification for ConfigurationError {
    fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        None
    }

    fn max_retries(&self) -> u32 {
        0
    }
}

impl ErrorClassification for ChannelError {
    fn category(&self) -> ErrorCategory {
        match self {
            ChannelError::Closed { .. } => ErrorCategory::Permanent,
            ChannelError::Full { .. } => ErrorCategory::ResourceExhausted,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            ChannelError::Full { .. } => Some(Duration::from_millis(10)),
            ChannelError::Closed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_classification() {
        let err = ConfigurationError::missing("name");
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.is_permanent());
        assert!(!err.is_transient());
        assert_eq!(err.max_retries(), 0);
        assert!(err.suggested_retry_delay().is_none());
    }

    #[test]
    fn test_channel_error_classification() {
        let err = ChannelError::Full {
            channel: "candle",
            capacity: 1000,
        };
        assert!(err.is_transient());
        assert_eq!(err.category(), ErrorCategory::ResourceExhausted);

        let err = ChannelError::Closed { channel: "candle" };
        assert!(err.is_permanent());
    }
}
