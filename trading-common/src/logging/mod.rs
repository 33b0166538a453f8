//! Logging setup for the ingestion crates.
//!
//! Every crate logs through `tracing` macros; binaries and tests install a
//! subscriber once with [`init_logging`].
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Standard tracing filter (e.g., `info`, `broker_ingest=debug`)
//! - `LOG_LEVEL`: Fallback level when `RUST_LOG` is not set
//! - `LOG_FORMAT`: Output format - `pretty` (default), `compact`, or `json`
//! - `LOG_TIMESTAMPS`: Timestamp format - `local` (default), `utc`, or `none`
//!
//! # Usage
//!
//! ```rust,ignore
//! use trading_common::logging::{init_logging, LogConfig, LogFormat};
//!
//! init_logging(LogConfig::from_env())?;
//!
//! init_logging(LogConfig {
//!     format: LogFormat::Json,
//!     default_level: "debug".to_string(),
//!     ..Default::default()
//! })?;
//! ```

mod config;

pub use config::{init_logging, LogConfig, LogFormat, TimestampFormat};
