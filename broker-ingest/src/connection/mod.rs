//! Connection lifecycle
//!
//! [`ConnectionManager`] owns the connection state machine of one broker:
//! connect and disconnect, automatic reconnection after errors, and a
//! periodic health probe. Source-specific work is delegated to
//! [`ConnectionHooks`].

mod error;
mod manager;
mod state;

pub use error::ConnectionError;
pub use manager::{ConnectionHooks, ConnectionManager, ConnectionSettings, HEALTH_PROBE_TIMEOUT};
pub use state::{ConnectionInfo, ConnectionState};
