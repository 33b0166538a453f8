// trading-common: Shared market data types, error classification and logging
// Used by broker-ingest and any downstream consumer of the broker channels

pub mod data;
pub mod error;
pub mod logging;

pub use data::{InstrumentKey, InstrumentType, MarketType};
