//! Error handling shared across the ingestion crates.
//!
//! This module provides:
//! - Common error types reused by the broker and storage layers
//! - The [`ErrorClassification`] trait used to decide whether a failure is worth retrying
//!
//! # Usage
//!
//! ```rust,ignore
//! use trading_common::error::ErrorClassification;
//!
//! fn should_retry(err: &impl ErrorClassification, attempt: u32) -> bool {
//!     err.is_transient() && attempt < err.max_retries()
//! }
//! ```

mod common;
mod traits;

pub use common::*;
pub use traits::*;
