//! Storage backend traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trading_common::data::{Candle, Instrument, OrderBook, Ticker};
use uuid::Uuid;

use super::error::StorageResult;
use super::filter::TimeSeriesFilter;
use crate::broker::BrokerConfig;
use crate::subscription::Subscription;

pub const TICKERS_TABLE: &str = "tickers";
pub const CANDLES_TABLE: &str = "candles";
pub const ORDER_BOOKS_TABLE: &str = "order_books";

/// Reference data store: instruments, subscriptions and broker configs
#[async_trait]
pub trait MetadataStorage: Send + Sync {
    async fn connect(&self) -> StorageResult<()>;
    async fn disconnect(&self) -> StorageResult<()>;
    async fn health(&self) -> StorageResult<()>;
    /// Create tables and indexes if they do not exist
    async fn migrate(&self) -> StorageResult<()>;

    /// Insert or replace by symbol
    async fn save_instrument(&self, instrument: &Instrument) -> StorageResult<()>;
    async fn get_instrument(&self, symbol: &str) -> StorageResult<Option<Instrument>>;
    /// Instruments ordered by symbol
    async fn list_instruments(&self, active_only: bool) -> StorageResult<Vec<Instrument>>;
    /// Returns whether a row was removed; the instrument's subscriptions go with it
    async fn delete_instrument(&self, symbol: &str) -> StorageResult<bool>;

    /// Insert or replace by id
    ///
    /// The instrument named by `subscription.key.symbol` must be saved first.
    async fn save_subscription(&self, subscription: &Subscription) -> StorageResult<()>;
    async fn get_subscription(&self, id: Uuid) -> StorageResult<Option<Subscription>>;
    /// Subscriptions ordered by broker then symbol, optionally for one broker
    async fn list_subscriptions(&self, broker_id: Option<&str>)
        -> StorageResult<Vec<Subscription>>;
    async fn delete_subscription(&self, id: Uuid) -> StorageResult<bool>;

    /// Insert or replace by id
    async fn save_broker_config(&self, config: &BrokerConfig) -> StorageResult<()>;
    async fn get_broker_config(&self, id: &str) -> StorageResult<Option<BrokerConfig>>;
    /// Broker configs ordered by id
    async fn list_broker_configs(&self) -> StorageResult<Vec<BrokerConfig>>;
    async fn delete_broker_config(&self, id: &str) -> StorageResult<bool>;
}

/// Market record store
///
/// Reads return records in ascending timestamp order with the filter's
/// `offset` and `limit` applied last.
#[async_trait]
pub trait TimeSeriesStorage: Send + Sync {
    async fn connect(&self) -> StorageResult<()>;
    async fn disconnect(&self) -> StorageResult<()>;
    async fn health(&self) -> StorageResult<()>;
    async fn migrate(&self) -> StorageResult<()>;

    /// Returns the number of records written
    async fn save_tickers(&self, tickers: &[Ticker]) -> StorageResult<usize>;
    async fn save_candles(&self, candles: &[Candle]) -> StorageResult<usize>;
    async fn save_order_books(&self, books: &[OrderBook]) -> StorageResult<usize>;

    async fn get_tickers(&self, filter: &TimeSeriesFilter) -> StorageResult<Vec<Ticker>>;
    async fn get_candles(&self, filter: &TimeSeriesFilter) -> StorageResult<Vec<Candle>>;
    async fn get_order_books(&self, filter: &TimeSeriesFilter) -> StorageResult<Vec<OrderBook>>;

    /// Delete every record older than `cutoff`, returning the number removed
    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64>;

    async fn stats(&self) -> StorageResult<TimeSeriesStats>;
}

/// Row statistics for one time-series table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    pub table: String,
    pub row_count: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// On-disk size, when the backend can report it
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesStats {
    pub tables: Vec<TableStats>,
}

impl TimeSeriesStats {
    pub fn table(&self, name: &str) -> Option<&TableStats> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.row_count).sum()
    }
}
