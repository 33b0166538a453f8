//! Common error types shared across crates.
//!
//! Crate-specific errors wrap these using `#[from]`.

use thiserror::Error;

/// Configuration-related errors.
///
/// Raised once when a configuration is validated; never retried.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// Required field is missing or empty
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Field has invalid value
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    /// The configuration names something this build does not support
    #[error("Unsupported {kind}: {value}")]
    Unsupported { kind: &'static str, value: String },

    /// Configuration source could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Entity is disabled in configuration
    #[error("{0} is disabled")]
    Disabled(String),
}

impl ConfigurationError {
    /// Create a MissingField error
    pub fn missing(field: impl Into<String>) -> Self {
        ConfigurationError::MissingField(field.into())
    }

    /// Create an InvalidValue error
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Bounded channel errors.
///
/// Producers on the hot path never see these as failures; they are turned
/// into drop counters by the owner of the channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChannelError {
    /// Channel was closed by its owner
    #[error("{channel} channel closed")]
    Closed { channel: &'static str },

    /// Channel is full (backpressure)
    #[error("{channel} channel full (capacity: {capacity})")]
    Full {
        channel: &'static str,
        capacity: usize,
    },
}
