//! Storage router
//!
//! Market records go only to the time-series backend; instruments,
//! subscriptions and broker configs go only to the metadata backend. The
//! router never retries: backend errors reach the caller unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use trading_common::data::{Candle, Instrument, OrderBook, Ticker};
use uuid::Uuid;

use super::error::{StorageError, StorageResult};
use super::filter::TimeSeriesFilter;
use super::memory::{InMemoryMetadataStorage, InMemoryTimeSeriesStorage};
use super::postgres::PostgresMetadataStorage;
use super::timescale::TimescaleStorage;
use super::traits::{MetadataStorage, TimeSeriesStats, TimeSeriesStorage};
use crate::broker::{Broker, BrokerConfig};
use crate::config::Settings;
use crate::subscription::Subscription;

pub const METADATA_BACKEND: &str = "metadata";
pub const TIMESERIES_BACKEND: &str = "timeseries";

/// Counts of records moved from a broker's channels into storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub tickers: usize,
    pub candles: usize,
    pub order_books: usize,
}

impl FlushSummary {
    pub fn total(&self) -> usize {
        self.tickers + self.candles + self.order_books
    }
}

/// Routes each call to the backend that owns its data
#[derive(Clone)]
pub struct StorageRouter {
    metadata: Arc<dyn MetadataStorage>,
    timeseries: Arc<dyn TimeSeriesStorage>,
    default_query_limit: Option<usize>,
}

impl StorageRouter {
    pub fn new(metadata: Arc<dyn MetadataStorage>, timeseries: Arc<dyn TimeSeriesStorage>) -> Self {
        Self {
            metadata,
            timeseries,
            default_query_limit: None,
        }
    }

    /// Both backends in process
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryMetadataStorage::new()),
            Arc::new(InMemoryTimeSeriesStorage::new()),
        )
    }

    /// PostgreSQL metadata and TimescaleDB time-series backends, not yet connected
    pub fn from_settings(settings: &Settings) -> Self {
        let metadata = PostgresMetadataStorage::new(settings.metadata_database.clone());
        let timeseries = TimescaleStorage::new(settings.timeseries_database.clone())
            .with_batch_size(settings.storage.batch_insert_size);
        Self::new(Arc::new(metadata), Arc::new(timeseries))
            .with_default_query_limit(settings.storage.default_query_limit)
    }

    /// Limit applied to time-series reads whose filter has none
    pub fn with_default_query_limit(mut self, limit: usize) -> Self {
        self.default_query_limit = Some(limit);
        self
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStorage> {
        &self.metadata
    }

    pub fn timeseries(&self) -> &Arc<dyn TimeSeriesStorage> {
        &self.timeseries
    }

    /// Connect the metadata backend, then the time-series backend.
    ///
    /// Stops at the first failure. If the time-series connect fails the
    /// already connected metadata backend is disconnected again.
    pub async fn initialize(&self) -> StorageResult<()> {
        info!("Initializing storage backends");
        self.metadata.connect().await.map_err(|e| {
            error!("Failed to connect {} storage: {}", METADATA_BACKEND, e);
            e
        })?;

        if let Err(e) = self.timeseries.connect().await {
            error!("Failed to connect {} storage: {}", TIMESERIES_BACKEND, e);
            if let Err(rollback) = self.metadata.disconnect().await {
                warn!("Failed to disconnect {} storage: {}", METADATA_BACKEND, rollback);
            }
            return Err(e);
        }

        info!("Storage backends initialized");
        Ok(())
    }

    /// Disconnect both backends, reporting every failure
    pub async fn shutdown(&self) -> StorageResult<()> {
        let mut failures = Vec::new();
        if let Err(e) = self.metadata.disconnect().await {
            warn!("Failed to disconnect {} storage: {}", METADATA_BACKEND, e);
            failures.push((METADATA_BACKEND.to_string(), e));
        }
        if let Err(e) = self.timeseries.disconnect().await {
            warn!("Failed to disconnect {} storage: {}", TIMESERIES_BACKEND, e);
            failures.push((TIMESERIES_BACKEND.to_string(), e));
        }

        if failures.is_empty() {
            info!("Storage backends shut down");
            Ok(())
        } else {
            Err(StorageError::Aggregate(failures))
        }
    }

    pub async fn health(&self) -> HashMap<&'static str, StorageResult<()>> {
        let (metadata, timeseries) = tokio::join!(self.metadata.health(), self.timeseries.health());
        HashMap::from([(METADATA_BACKEND, metadata), (TIMESERIES_BACKEND, timeseries)])
    }

    pub async fn is_healthy(&self) -> bool {
        self.health().await.values().all(|r| r.is_ok())
    }

    /// Run schema setup on both backends
    pub async fn migrate(&self) -> StorageResult<()> {
        self.metadata.migrate().await?;
        self.timeseries.migrate().await?;
        Ok(())
    }

    /// Remove market records older than `retention`
    pub async fn cleanup_old_data(&self, retention: chrono::Duration) -> StorageResult<u64> {
        let cutoff = Utc::now() - retention;
        info!("Cleaning up market data older than {}", cutoff);
        self.timeseries.cleanup_before(cutoff).await
    }

    pub async fn timeseries_stats(&self) -> StorageResult<TimeSeriesStats> {
        self.timeseries.stats().await
    }

    fn effective_filter<'a>(
        &self,
        filter: &'a TimeSeriesFilter,
    ) -> std::borrow::Cow<'a, TimeSeriesFilter> {
        match (filter.limit, self.default_query_limit) {
            (None, Some(limit)) => std::borrow::Cow::Owned(filter.clone().limit(limit)),
            _ => std::borrow::Cow::Borrowed(filter),
        }
    }

    // Time-series routing

    pub async fn save_tickers(&self, tickers: &[Ticker]) -> StorageResult<usize> {
        self.timeseries.save_tickers(tickers).await
    }

    pub async fn save_candles(&self, candles: &[Candle]) -> StorageResult<usize> {
        self.timeseries.save_candles(candles).await
    }

    pub async fn save_order_books(&self, books: &[OrderBook]) -> StorageResult<usize> {
        self.timeseries.save_order_books(books).await
    }

    pub async fn get_tickers(&self, filter: &TimeSeriesFilter) -> StorageResult<Vec<Ticker>> {
        self.timeseries
            .get_tickers(&self.effective_filter(filter))
            .await
    }

    pub async fn get_candles(&self, filter: &TimeSeriesFilter) -> StorageResult<Vec<Candle>> {
        self.timeseries
            .get_candles(&self.effective_filter(filter))
            .await
    }

    pub async fn get_order_books(&self, filter: &TimeSeriesFilter) -> StorageResult<Vec<OrderBook>> {
        self.timeseries
            .get_order_books(&self.effective_filter(filter))
            .await
    }

    /// Drain whatever is buffered in a broker's core channels and persist it
    pub async fn flush_broker(&self, broker: &dyn Broker) -> StorageResult<FlushSummary> {
        let tickers = broker.ticker_channel().drain();
        let candles = broker.candle_channel().drain();
        let books = broker.order_book_channel().drain();

        let summary = FlushSummary {
            tickers: self.save_tickers(&tickers).await?,
            candles: self.save_candles(&candles).await?,
            order_books: self.save_order_books(&books).await?,
        };
        if summary.total() > 0 {
            info!("Flushed {} records from broker {}", summary.total(), broker.id());
        }
        Ok(summary)
    }

    // Metadata routing

    pub async fn save_instrument(&self, instrument: &Instrument) -> StorageResult<()> {
        self.metadata.save_instrument(instrument).await
    }

    pub async fn get_instrument(&self, symbol: &str) -> StorageResult<Option<Instrument>> {
        self.metadata.get_instrument(symbol).await
    }

    pub async fn list_instruments(&self, active_only: bool) -> StorageResult<Vec<Instrument>> {
        self.metadata.list_instruments(active_only).await
    }

    pub async fn delete_instrument(&self, symbol: &str) -> StorageResult<bool> {
        self.metadata.delete_instrument(symbol).await
    }

    pub async fn save_subscription(&self, subscription: &Subscription) -> StorageResult<()> {
        self.metadata.save_subscription(subscription).await
    }

    pub async fn get_subscription(&self, id: Uuid) -> StorageResult<Option<Subscription>> {
        self.metadata.get_subscription(id).await
    }

    pub async fn list_subscriptions(
        &self,
        broker_id: Option<&str>,
    ) -> StorageResult<Vec<Subscription>> {
        self.metadata.list_subscriptions(broker_id).await
    }

    pub async fn delete_subscription(&self, id: Uuid) -> StorageResult<bool> {
        self.metadata.delete_subscription(id).await
    }

    pub async fn save_broker_config(&self, config: &BrokerConfig) -> StorageResult<()> {
        self.metadata.save_broker_config(config).await
    }

    pub async fn get_broker_config(&self, id: &str) -> StorageResult<Option<BrokerConfig>> {
        self.metadata.get_broker_config(id).await
    }

    pub async fn list_broker_configs(&self) -> StorageResult<Vec<BrokerConfig>> {
        self.metadata.list_broker_configs().await
    }

    pub async fn delete_broker_config(&self, id: &str) -> StorageResult<bool> {
        self.metadata.delete_broker_config(id).await
    }
}

impl std::fmt::Debug for StorageRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageRouter")
            .field("default_query_limit", &self.default_query_limit)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trading_common::data::InstrumentKey;

    /// Time-series backend that refuses to connect and counts calls
    #[derive(Default)]
    struct FailingTimeSeries {
        connects: AtomicUsize,
    }

    #[async_trait]
    impl TimeSeriesStorage for FailingTimeSeries {
        async fn connect(&self) -> StorageResult<()> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::NotConnected("timeseries"))
        }
        async fn disconnect(&self) -> StorageResult<()> {
            Err(StorageError::InvalidData("pool already closed".to_string()))
        }
        async fn health(&self) -> StorageResult<()> {
            Err(StorageError::NotConnected("timeseries"))
        }
        async fn migrate(&self) -> StorageResult<()> {
            Ok(())
        }
        async fn save_tickers(&self, _: &[Ticker]) -> StorageResult<usize> {
            Err(StorageError::NotConnected("timeseries"))
        }
        async fn save_candles(&self, _: &[Candle]) -> StorageResult<usize> {
            Err(StorageError::NotConnected("timeseries"))
        }
        async fn save_order_books(&self, _: &[OrderBook]) -> StorageResult<usize> {
            Err(StorageError::NotConnected("timeseries"))
        }
        async fn get_tickers(&self, _: &TimeSeriesFilter) -> StorageResult<Vec<Ticker>> {
            Ok(Vec::new())
        }
        async fn get_candles(&self, _: &TimeSeriesFilter) -> StorageResult<Vec<Candle>> {
            Ok(Vec::new())
        }
        async fn get_order_books(&self, _: &TimeSeriesFilter) -> StorageResult<Vec<OrderBook>> {
            Ok(Vec::new())
        }
        async fn cleanup_before(&self, _: DateTime<Utc>) -> StorageResult<u64> {
            Ok(0)
        }
        async fn stats(&self) -> StorageResult<TimeSeriesStats> {
            Ok(TimeSeriesStats::default())
        }
    }

    #[tokio::test]
    async fn test_initialize_fails_fast_and_rolls_back_metadata() {
        let metadata = Arc::new(InMemoryMetadataStorage::new());
        let timeseries = Arc::new(FailingTimeSeries::default());
        let router = StorageRouter::new(metadata.clone(), timeseries.clone());

        let err = router.initialize().await.unwrap_err();
        assert!(matches!(err, StorageError::NotConnected("timeseries")));
        assert_eq!(timeseries.connects.load(Ordering::SeqCst), 1);
        assert!(metadata.health().await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_aggregates_failures() {
        let router = StorageRouter::new(
            Arc::new(InMemoryMetadataStorage::new()),
            Arc::new(FailingTimeSeries::default()),
        );
        let err = router.shutdown().await.unwrap_err();
        assert_eq!(err.failed_backends(), vec![TIMESERIES_BACKEND]);
    }

    #[tokio::test]
    async fn test_health_reports_both_backends() {
        let router = StorageRouter::in_memory();
        let health = router.health().await;
        assert_eq!(health.len(), 2);
        assert!(health[METADATA_BACKEND].is_err());

        router.initialize().await.unwrap();
        assert!(router.is_healthy().await);
    }

    #[tokio::test]
    async fn test_default_query_limit_applies_only_when_unset() {
        let router = StorageRouter::in_memory().with_default_query_limit(2);
        router.initialize().await.unwrap();

        let key = InstrumentKey::crypto_spot("BTCUSDT");
        let now = Utc::now();
        let tickers: Vec<Ticker> = (0..5)
            .map(|i| Ticker::new(&key, "binance", dec!(100), now + Duration::seconds(i)))
            .collect();
        router.save_tickers(&tickers).await.unwrap();

        assert_eq!(router.get_tickers(&TimeSeriesFilter::new()).await.unwrap().len(), 2);
        assert_eq!(
            router
                .get_tickers(&TimeSeriesFilter::new().limit(4))
                .await
                .unwrap()
                .len(),
            4
        );
    }

    #[tokio::test]
    async fn test_cleanup_old_data_uses_retention() {
        let router = StorageRouter::in_memory();
        router.initialize().await.unwrap();

        let key = InstrumentKey::crypto_spot("BTCUSDT");
        let now = Utc::now();
        router
            .save_tickers(&[
                Ticker::new(&key, "binance", dec!(1), now - Duration::days(10)),
                Ticker::new(&key, "binance", dec!(2), now),
            ])
            .await
            .unwrap();

        assert_eq!(router.cleanup_old_data(Duration::days(7)).await.unwrap(), 1);
        assert_eq!(router.timeseries_stats().await.unwrap().total_rows(), 1);
    }
}
