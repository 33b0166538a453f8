//! Storage layer
//!
//! [`StorageRouter`] fronts two backends:
//!
//! - [`MetadataStorage`]: instruments, subscriptions and broker configs
//!   ([`PostgresMetadataStorage`], [`InMemoryMetadataStorage`])
//! - [`TimeSeriesStorage`]: tickers, candles and order books
//!   ([`TimescaleStorage`], [`InMemoryTimeSeriesStorage`])

mod error;
mod filter;
mod memory;
mod postgres;
mod router;
mod timescale;
mod traits;

pub use error::{StorageError, StorageResult};
pub use filter::TimeSeriesFilter;
pub use memory::{InMemoryMetadataStorage, InMemoryTimeSeriesStorage};
pub use postgres::PostgresMetadataStorage;
pub use router::{FlushSummary, StorageRouter, METADATA_BACKEND, TIMESERIES_BACKEND};
pub use timescale::TimescaleStorage;
pub use traits::{
    MetadataStorage, TableStats, TimeSeriesStats, TimeSeriesStorage, CANDLES_TABLE,
    ORDER_BOOKS_TABLE, TICKERS_TABLE,
};
