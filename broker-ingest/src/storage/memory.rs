//! In-process storage backends.
//!
//! Both stores keep everything behind `parking_lot` locks and honour the same
//! connect/disconnect contract as the database backends: every operation on a
//! disconnected store fails with [`StorageError::NotConnected`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};
use trading_common::data::{Candle, Instrument, MarketRecord, OrderBook, Ticker};
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::filter::TimeSeriesFilter;
use super::traits::{
    MetadataStorage, TableStats, TimeSeriesStats, TimeSeriesStorage, CANDLES_TABLE,
    ORDER_BOOKS_TABLE, TICKERS_TABLE,
};
use crate::broker::BrokerConfig;
use crate::subscription::Subscription;

fn ensure_connected(flag: &AtomicBool, backend: &'static str) -> StorageResult<()> {
    if flag.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(StorageError::NotConnected(backend))
    }
}

/// Metadata store backed by ordered maps
#[derive(Debug, Default)]
pub struct InMemoryMetadataStorage {
    connected: AtomicBool,
    instruments: RwLock<BTreeMap<String, Instrument>>,
    subscriptions: RwLock<BTreeMap<Uuid, Subscription>>,
    broker_configs: RwLock<BTreeMap<String, BrokerConfig>>,
}

impl InMemoryMetadataStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> StorageResult<()> {
        ensure_connected(&self.connected, "metadata")
    }
}

#[async_trait]
impl MetadataStorage for InMemoryMetadataStorage {
    async fn connect(&self) -> StorageResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        debug!("In-memory metadata storage connected");
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn health(&self) -> StorageResult<()> {
        self.check()
    }

    async fn migrate(&self) -> StorageResult<()> {
        self.check()
    }

    async fn save_instrument(&self, instrument: &Instrument) -> StorageResult<()> {
        self.check()?;
        self.instruments
            .write()
            .insert(instrument.symbol.clone(), instrument.clone());
        Ok(())
    }

    async fn get_instrument(&self, symbol: &str) -> StorageResult<Option<Instrument>> {
        self.check()?;
        Ok(self.instruments.read().get(symbol).cloned())
    }

    async fn list_instruments(&self, active_only: bool) -> StorageResult<Vec<Instrument>> {
        self.check()?;
        Ok(self
            .instruments
            .read()
            .values()
            .filter(|i| !active_only || i.is_active)
            .cloned()
            .collect())
    }

    async fn delete_instrument(&self, symbol: &str) -> StorageResult<bool> {
        self.check()?;
        let removed = self.instruments.write().remove(symbol).is_some();
        if removed {
            self.subscriptions
                .write()
                .retain(|_, s| s.key.symbol != symbol);
        }
        Ok(removed)
    }

    async fn save_subscription(&self, subscription: &Subscription) -> StorageResult<()> {
        self.check()?;
        let symbol = &subscription.key.symbol;
        if !self.instruments.read().contains_key(symbol) {
            return Err(StorageError::NotFound(format!("instrument {}", symbol)));
        }
        self.subscriptions
            .write()
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> StorageResult<Option<Subscription>> {
        self.check()?;
        Ok(self.subscriptions.read().get(&id).cloned())
    }

    async fn list_subscriptions(
        &self,
        broker_id: Option<&str>,
    ) -> StorageResult<Vec<Subscription>> {
        self.check()?;
        let mut subscriptions: Vec<Subscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| broker_id.map_or(true, |id| s.broker_id == id))
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| {
            (a.broker_id.as_str(), a.key.symbol.as_str())
                .cmp(&(b.broker_id.as_str(), b.key.symbol.as_str()))
        });
        Ok(subscriptions)
    }

    async fn delete_subscription(&self, id: Uuid) -> StorageResult<bool> {
        self.check()?;
        Ok(self.subscriptions.write().remove(&id).is_some())
    }

    async fn save_broker_config(&self, config: &BrokerConfig) -> StorageResult<()> {
        self.check()?;
        self.broker_configs
            .write()
            .insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn get_broker_config(&self, id: &str) -> StorageResult<Option<BrokerConfig>> {
        self.check()?;
        Ok(self.broker_configs.read().get(id).cloned())
    }

    async fn list_broker_configs(&self) -> StorageResult<Vec<BrokerConfig>> {
        self.check()?;
        Ok(self.broker_configs.read().values().cloned().collect())
    }

    async fn delete_broker_config(&self, id: &str) -> StorageResult<bool> {
        self.check()?;
        Ok(self.broker_configs.write().remove(id).is_some())
    }
}

/// Time-series store backed by vectors
#[derive(Debug, Default)]
pub struct InMemoryTimeSeriesStorage {
    connected: AtomicBool,
    tickers: RwLock<Vec<Ticker>>,
    candles: RwLock<Vec<Candle>>,
    order_books: RwLock<Vec<OrderBook>>,
}

impl InMemoryTimeSeriesStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> StorageResult<()> {
        ensure_connected(&self.connected, "timeseries")
    }
}

fn table_stats<T: MarketRecord>(table: &str, records: &[T]) -> TableStats {
    TableStats {
        table: table.to_string(),
        row_count: records.len() as u64,
        oldest: records.iter().map(|r| r.timestamp()).min(),
        newest: records.iter().map(|r| r.timestamp()).max(),
        size_bytes: None,
    }
}

fn retain_since<T: MarketRecord>(records: &mut Vec<T>, cutoff: DateTime<Utc>) -> u64 {
    let before = records.len();
    records.retain(|r| r.timestamp() >= cutoff);
    (before - records.len()) as u64
}

#[async_trait]
impl TimeSeriesStorage for InMemoryTimeSeriesStorage {
    async fn connect(&self) -> StorageResult<()> {
        self.connected.store(true, Ordering::SeqCst);
        debug!("In-memory time-series storage connected");
        Ok(())
    }

    async fn disconnect(&self) -> StorageResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn health(&self) -> StorageResult<()> {
        self.check()
    }

    async fn migrate(&self) -> StorageResult<()> {
        self.check()
    }

    async fn save_tickers(&self, tickers: &[Ticker]) -> StorageResult<usize> {
        self.check()?;
        self.tickers.write().extend_from_slice(tickers);
        Ok(tickers.len())
    }

    async fn save_candles(&self, candles: &[Candle]) -> StorageResult<usize> {
        self.check()?;
        self.candles.write().extend_from_slice(candles);
        Ok(candles.len())
    }

    async fn save_order_books(&self, books: &[OrderBook]) -> StorageResult<usize> {
        self.check()?;
        self.order_books.write().extend_from_slice(books);
        Ok(books.len())
    }

    async fn get_tickers(&self, filter: &TimeSeriesFilter) -> StorageResult<Vec<Ticker>> {
        self.check()?;
        let matched = self
            .tickers
            .read()
            .iter()
            .filter(|t| filter.matches(*t))
            .cloned()
            .collect();
        Ok(filter.page(matched))
    }

    async fn get_candles(&self, filter: &TimeSeriesFilter) -> StorageResult<Vec<Candle>> {
        self.check()?;
        let matched = self
            .candles
            .read()
            .iter()
            .filter(|c| filter.matches_candle(c))
            .cloned()
            .collect();
        Ok(filter.page(matched))
    }

    async fn get_order_books(&self, filter: &TimeSeriesFilter) -> StorageResult<Vec<OrderBook>> {
        self.check()?;
        let matched = self
            .order_books
            .read()
            .iter()
            .filter(|b| filter.matches(*b))
            .cloned()
            .collect();
        Ok(filter.page(matched))
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        self.check()?;
        let removed = retain_since(&mut *self.tickers.write(), cutoff)
            + retain_since(&mut *self.candles.write(), cutoff)
            + retain_since(&mut *self.order_books.write(), cutoff);
        info!("Removed {} records older than {}", removed, cutoff);
        Ok(removed)
    }

    async fn stats(&self) -> StorageResult<TimeSeriesStats> {
        self.check()?;
        Ok(TimeSeriesStats {
            tables: vec![
                table_stats(TICKERS_TABLE, self.tickers.read().as_slice()),
                table_stats(CANDLES_TABLE, self.candles.read().as_slice()),
                table_stats(ORDER_BOOKS_TABLE, self.order_books.read().as_slice()),
            ],
        })
    }
}
