//! Crypto broker: retrying connection, rich subscription lifecycle, derivatives streams

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use trading_common::data::{
    Candle, FundingRate, Liquidation, MarkPrice, MarketRecord, OrderBook, Ticker,
};

use super::base::{BrokerBase, InstrumentSubscription};
use super::capabilities::DerivativesFeed;
use super::channels::{DataReceiver, DerivativesChannels};
use super::config::{BrokerConfig, BrokerType};
use super::error::{BrokerError, BrokerResult};
use super::stats::BrokerStats;
use super::traits::Broker;
use super::transport::FeedTransport;
use crate::connection::{
    ConnectionError, ConnectionHooks, ConnectionInfo, ConnectionManager, ConnectionSettings,
};
use crate::subscription::{Subscription, SubscriptionError, SubscriptionHooks, SubscriptionManager};

/// How often an idle feed loop checks whether the connection is back
const FEED_IDLE_POLL: Duration = Duration::from_millis(50);

/// Glue between the state machines and the transport
struct CryptoHooks {
    base: Arc<BrokerBase>,
    transport: Arc<dyn FeedTransport>,
}

#[async_trait]
impl ConnectionHooks for CryptoHooks {
    async fn on_connect(&self) -> Result<(), ConnectionError> {
        self.transport.open(self.base.config()).await?;
        self.base.set_connected(true);

        // Replay the registry after a reconnect
        for entry in self.base.subscriptions() {
            let subscription = Subscription::new(entry.key.clone(), self.base.id(), entry.data_types);
            if let Err(e) = self.transport.subscribe(&subscription).await {
                warn!(
                    "Broker {} failed to restore subscription {}: {}",
                    self.base.id(),
                    entry.key,
                    e
                );
            }
        }
        Ok(())
    }

    async fn on_disconnect(&self) -> Result<(), ConnectionError> {
        self.base.set_connected(false);
        self.transport.close().await
    }

    async fn on_error(&self, _error: &ConnectionError) {
        self.base.set_connected(false);
        self.base.record_connection_error();
    }
}

#[async_trait]
impl SubscriptionHooks for CryptoHooks {
    async fn on_subscribe(&self, subscription: &Subscription) -> Result<(), SubscriptionError> {
        self.transport.subscribe(subscription).await?;
        self.base
            .subscribe(&[InstrumentSubscription::from(subscription)]);
        Ok(())
    }

    async fn on_unsubscribe(&self, subscription: &Subscription) -> Result<(), SubscriptionError> {
        self.transport.unsubscribe(subscription).await?;
        self.base
            .unsubscribe(&[InstrumentSubscription::from(subscription)]);
        Ok(())
    }
}

/// Broker for crypto venues
pub struct CryptoBroker {
    base: Arc<BrokerBase>,
    derivatives: Arc<DerivativesChannels>,
    transport: Arc<dyn FeedTransport>,
    connection: ConnectionManager,
    subscriptions: SubscriptionManager,
    feed_started: AtomicBool,
}

impl CryptoBroker {
    /// `config` is expected to be validated by the factory
    pub fn new(config: BrokerConfig, transport: Arc<dyn FeedTransport>) -> Self {
        let derivatives = Arc::new(DerivativesChannels::new(config.buffer.buffer_size));
        let settings = ConnectionSettings::from(&config.connection);
        let max_subscriptions = config.limits.max_subscriptions;
        let base = Arc::new(BrokerBase::new(config).with_derivatives(Arc::clone(&derivatives)));

        let hooks = Arc::new(CryptoHooks {
            base: Arc::clone(&base),
            transport: Arc::clone(&transport),
        });
        let connection = ConnectionManager::new(base.id(), settings, hooks.clone());
        let subscriptions = SubscriptionManager::new(base.id(), hooks, max_subscriptions);

        Self {
            base,
            derivatives,
            transport,
            connection,
            subscriptions,
            feed_started: AtomicBool::new(false),
        }
    }

    pub fn base(&self) -> &Arc<BrokerBase> {
        &self.base
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.connection.info()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn subscription_manager(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    fn start_health_check(&self) {
        let transport = Arc::clone(&self.transport);
        self.connection.start_health_check(move || {
            let transport = Arc::clone(&transport);
            async move { transport.probe().await }
        });
    }

    fn spawn_feed(&self) {
        if self.feed_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let base = Arc::clone(&self.base);
        let transport = Arc::clone(&self.transport);
        let connection = self.connection.clone();
        let token = self.base.cancellation_token();

        self.base.spawn(async move {
            debug!("Feed loop started for broker {}", base.id());
            loop {
                if token.is_cancelled() {
                    break;
                }
                if !connection.is_connected() {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(FEED_IDLE_POLL) => continue,
                    }
                }

                match transport.run(Arc::clone(&base), token.clone()).await {
                    Ok(()) => break,
                    Err(e) => {
                        warn!("Broker {} feed loop failed: {}", base.id(), e);
                        connection.handle_error(e).await;
                    }
                }
            }
            debug!("Feed loop stopped for broker {}", base.id());
        });
    }

    fn ensure_open(&self) -> BrokerResult<()> {
        if self.base.is_closed() {
            return Err(BrokerError::Closed(self.base.id().to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for CryptoBroker {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn broker_type(&self) -> BrokerType {
        BrokerType::Crypto
    }

    fn config(&self) -> &BrokerConfig {
        self.base.config()
    }

    async fn connect(&self) -> BrokerResult<()> {
        self.ensure_open()?;
        self.connection.connect().await?;
        self.start_health_check();
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        self.connection.disconnect().await?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    async fn start(&self) -> BrokerResult<()> {
        self.connect().await?;
        self.spawn_feed();
        info!("Broker {} started", self.id());
        Ok(())
    }

    async fn stop(&self) -> BrokerResult<()> {
        if let Err(e) = self.subscriptions.shutdown().await {
            warn!("Broker {} unsubscribe during stop failed: {}", self.id(), e);
        }
        self.connection.shutdown().await;
        self.base.close().await;
        info!("Broker {} stopped", self.id());
        Ok(())
    }

    async fn subscribe(&self, subscriptions: &[Subscription]) -> BrokerResult<()> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected(self.id().to_string()));
        }
        self.subscriptions.subscribe(subscriptions).await?;
        Ok(())
    }

    async fn unsubscribe(&self, subscriptions: &[Subscription]) -> BrokerResult<()> {
        self.subscriptions.unsubscribe(subscriptions).await?;
        Ok(())
    }

    fn subscriptions(&self) -> Vec<InstrumentSubscription> {
        self.base.subscriptions()
    }

    fn ticker_channel(&self) -> DataReceiver<Ticker> {
        self.base.ticker_channel()
    }

    fn candle_channel(&self) -> DataReceiver<Candle> {
        self.base.candle_channel()
    }

    fn order_book_channel(&self) -> DataReceiver<OrderBook> {
        self.base.order_book_channel()
    }

    fn send_ticker(&self, ticker: Ticker) -> bool {
        self.subscriptions.update_data_received(&ticker.key());
        self.base.send_ticker(ticker)
    }

    fn send_candle(&self, candle: Candle) -> bool {
        self.subscriptions.update_data_received(&candle.key());
        self.base.send_candle(candle)
    }

    fn send_order_book(&self, order_book: OrderBook) -> bool {
        self.subscriptions.update_data_received(&order_book.key());
        self.base.send_order_book(order_book)
    }

    fn health(&self) -> BrokerResult<()> {
        if !self.connection.is_connected() {
            return Err(BrokerError::NotConnected(self.id().to_string()));
        }
        self.base.health()
    }

    fn stats(&self) -> BrokerStats {
        self.base.stats_with_connected(self.is_connected())
    }

    fn as_derivatives_feed(&self) -> Option<&dyn DerivativesFeed> {
        Some(self)
    }
}

impl DerivativesFeed for CryptoBroker {
    fn funding_rate_channel(&self) -> DataReceiver<FundingRate> {
        self.derivatives.funding_rate.receiver()
    }

    fn mark_price_channel(&self) -> DataReceiver<MarkPrice> {
        self.derivatives.mark_price.receiver()
    }

    fn liquidation_channel(&self) -> DataReceiver<Liquidation> {
        self.derivatives.liquidation.receiver()
    }

    fn send_funding_rate(&self, record: FundingRate) -> bool {
        self.base.send_funding_rate(record)
    }

    fn send_mark_price(&self, record: MarkPrice) -> bool {
        self.base.send_mark_price(record)
    }

    fn send_liquidation(&self, record: Liquidation) -> bool {
        self.base.send_liquidation(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LoopbackTransport;
    use crate::connection::ConnectionState;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use trading_common::data::{DataType, InstrumentKey, InstrumentType, MarketType};

    fn config() -> BrokerConfig {
        let mut config = BrokerConfig::new("binance", "Binance", BrokerType::Crypto)
            .with_websocket_url("wss://stream.binance.com:9443/ws")
            .with_buffer_size(16);
        config.connection.health_check_interval = None;
        config
    }

    fn broker() -> CryptoBroker {
        CryptoBroker::new(config(), Arc::new(LoopbackTransport::new()))
    }

    #[tokio::test]
    async fn test_connect_twice_is_noop() {
        let broker = broker();
        assert!(!broker.is_connected());

        broker.connect().await.unwrap();
        broker.connect().await.unwrap();

        assert!(broker.is_connected());
        assert!(broker.base().is_connected());
        assert_eq!(broker.connection_info().state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_subscribe_requires_connection() {
        let broker = broker();
        let sub = Subscription::new(
            InstrumentKey::crypto_spot("BTCUSDT"),
            "binance",
            vec![DataType::Ticker],
        );

        let err = broker.subscribe(&[sub.clone()]).await.unwrap_err();
        assert!(matches!(err, BrokerError::NotConnected(_)));

        broker.connect().await.unwrap();
        broker.subscribe(&[sub.clone()]).await.unwrap();
        assert_eq!(broker.subscriptions().len(), 1);
        assert_eq!(broker.stats().subscriptions, 1);

        broker.unsubscribe(&[sub]).await.unwrap();
        assert!(broker.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_derivatives_capability() {
        let broker = broker();
        let feed = broker.as_derivatives_feed().expect("crypto exposes derivatives");
        assert!(broker.as_equity_events_feed().is_none());

        let sent = feed.send_funding_rate(FundingRate {
            symbol: "BTCUSDT".to_string(),
            instrument_type: InstrumentType::Perpetual,
            market_type: MarketType::Crypto,
            broker_id: "binance".to_string(),
            rate: dec!(0.0001),
            next_funding_time: Utc::now(),
            timestamp: Utc::now(),
        });
        assert!(sent);
        assert_eq!(feed.funding_rate_channel().drain().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_closes_channels() {
        let broker = broker();
        broker.start().await.unwrap();
        broker.stop().await.unwrap();

        assert!(!broker.is_connected());
        let ticker = Ticker::new(
            &InstrumentKey::crypto_spot("BTCUSDT"),
            "binance",
            dec!(1),
            Utc::now(),
        );
        assert!(!broker.send_ticker(ticker));
        assert_eq!(broker.stats().data_errors, 1);
        assert!(matches!(broker.start().await, Err(BrokerError::Closed(_))));
    }
}
