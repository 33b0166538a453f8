//! Stock broker: single-shot connection, registry-only subscriptions, equity event streams

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use trading_common::data::{
    Candle, CorporateAction, Dividend, Earnings, OrderBook, Ticker,
};

use super::base::{BrokerBase, InstrumentSubscription};
use super::capabilities::EquityEventsFeed;
use super::channels::{DataReceiver, EquityChannels};
use super::config::{BrokerConfig, BrokerType};
use super::error::{BrokerError, BrokerResult};
use super::stats::BrokerStats;
use super::traits::Broker;
use super::transport::FeedTransport;
use crate::connection::ConnectionError;
use crate::subscription::{Subscription, SubscriptionError};

/// Broker for equity data vendors
///
/// Uses the base's connected flag; a lost connection is reported through
/// stats and health and is not retried.
pub struct StockBroker {
    base: Arc<BrokerBase>,
    equity: Arc<EquityChannels>,
    transport: Arc<dyn FeedTransport>,
    /// Serializes connect and disconnect
    transition: tokio::sync::Mutex<()>,
    feed_started: AtomicBool,
}

impl StockBroker {
    pub fn new(config: BrokerConfig, transport: Arc<dyn FeedTransport>) -> Self {
        let equity = Arc::new(EquityChannels::new(config.buffer.buffer_size));
        let base = Arc::new(BrokerBase::new(config).with_equity_events(Arc::clone(&equity)));
        Self {
            base,
            equity,
            transport,
            transition: tokio::sync::Mutex::new(()),
            feed_started: AtomicBool::new(false),
        }
    }

    pub fn base(&self) -> &Arc<BrokerBase> {
        &self.base
    }

    fn spawn_feed(&self) {
        if self.feed_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let base = Arc::clone(&self.base);
        let transport = Arc::clone(&self.transport);
        let token = self.base.cancellation_token();

        self.base.spawn(async move {
            if let Err(e) = transport.run(Arc::clone(&base), token).await {
                warn!("Broker {} feed loop failed: {}", base.id(), e);
                base.record_connection_error();
                base.set_connected(false);
            }
            debug!("Feed loop stopped for broker {}", base.id());
        });
    }
}

#[async_trait]
impl Broker for StockBroker {
    fn id(&self) -> &str {
        self.base.id()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn broker_type(&self) -> BrokerType {
        BrokerType::Stock
    }

    fn config(&self) -> &BrokerConfig {
        self.base.config()
    }

    async fn connect(&self) -> BrokerResult<()> {
        if self.base.is_closed() {
            return Err(BrokerError::Closed(self.id().to_string()));
        }

        let _guard = self.transition.lock().await;
        if self.base.is_connected() {
            debug!("Broker {} already connected", self.id());
            return Ok(());
        }

        let connect_timeout = self.base.config().connection.timeout;
        let result = match timeout(connect_timeout, self.transport.open(self.base.config())).await
        {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(connect_timeout)),
        };

        if let Err(e) = result {
            self.base.record_connection_error();
            warn!("Broker {} failed to connect: {}", self.id(), e);
            return Err(e.into());
        }

        self.base.set_connected(true);
        info!("Broker {} connected", self.id());
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        let _guard = self.transition.lock().await;
        if !self.base.is_connected() {
            return Ok(());
        }
        if let Err(e) = self.transport.close().await {
            warn!("Broker {} transport close failed: {}", self.id(), e);
        }
        self.base.set_connected(false);
        info!("Broker {} disconnected", self.id());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.base.is_connected()
    }

    async fn start(&self) -> BrokerResult<()> {
        self.connect().await?;
        self.spawn_feed();
        info!("Broker {} started", self.id());
        Ok(())
    }

    async fn stop(&self) -> BrokerResult<()> {
        self.disconnect().await?;
        self.base.close().await;
        info!("Broker {} stopped", self.id());
        Ok(())
    }

    async fn subscribe(&self, subscriptions: &[Subscription]) -> BrokerResult<()> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected(self.id().to_string()));
        }

        let mut failures = Vec::new();
        for subscription in subscriptions {
            if self.base.is_subscribed(&subscription.key) {
                continue;
            }
            match self.transport.subscribe(subscription).await {
                Ok(()) => self
                    .base
                    .subscribe(&[InstrumentSubscription::from(subscription)]),
                Err(e) => {
                    warn!(
                        "Broker {} failed to subscribe to {}: {}",
                        self.id(),
                        subscription.key,
                        e
                    );
                    failures.push((subscription.key.to_string(), e.to_string()));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SubscriptionError::Batch {
                operation: "subscribe",
                failures,
            }
            .into())
        }
    }

    async fn unsubscribe(&self, subscriptions: &[Subscription]) -> BrokerResult<()> {
        let mut failures = Vec::new();
        for subscription in subscriptions {
            if !self.base.is_subscribed(&subscription.key) {
                continue;
            }
            match self.transport.unsubscribe(subscription).await {
                Ok(()) => self
                    .base
                    .unsubscribe(&[InstrumentSubscription::from(subscription)]),
                Err(e) => failures.push((subscription.key.to_string(), e.to_string())),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SubscriptionError::Batch {
                operation: "unsubscribe",
                failures,
            }
            .into())
        }
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
        self.base.send_ticker(ticker)
    }

    fn send_candle(&self, candle: Candle) -> bool {
        self.base.send_candle(candle)
    }

    fn send_order_book(&self, order_book: OrderBook) -> bool {
        self.base.send_order_book(order_book)
    }

    fn health(&self) -> BrokerResult<()> {
        self.base.health()
    }

    fn stats(&self) -> BrokerStats {
        self.base.stats()
    }

    fn as_equity_events_feed(&self) -> Option<&dyn EquityEventsFeed> {
        Some(self)
    }
}

impl EquityEventsFeed for StockBroker {
    fn dividend_channel(&self) -> DataReceiver<Dividend> {
        self.equity.dividend.receiver()
    }

    fn earnings_channel(&self) -> DataReceiver<Earnings> {
        self.equity.earnings.receiver()
    }

    fn corporate_action_channel(&self) -> DataReceiver<CorporateAction> {
        self.equity.corporate_action.receiver()
    }

    fn send_dividend(&self, record: Dividend) -> bool {
        self.base.send_dividend(record)
    }

    fn send_earnings(&self, record: Earnings) -> bool {
        self.base.send_earnings(record)
    }

    fn send_corporate_action(&self, record: CorporateAction) -> bool {
        self.base.send_corporate_action(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LoopbackTransport;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use trading_common::data::{DataType, InstrumentKey, InstrumentType, MarketType};

    /// Transport that refuses to open
    struct RefusingTransport;

    #[async_trait]
    impl FeedTransport for RefusingTransport {
        async fn open(&self, _config: &BrokerConfig) -> Result<(), ConnectionError> {
            Err(ConnectionError::Failed("market closed".to_string()))
        }
        async fn close(&self) -> Result<(), ConnectionError> {
            Ok(())
        }
        async fn probe(&self) -> Result<(), ConnectionError> {
            Err(ConnectionError::NotConnected)
        }
        async fn subscribe(&self, _s: &Subscription) -> Result<(), SubscriptionError> {
            Ok(())
        }
        async fn unsubscribe(&self, _s: &Subscription) -> Result<(), SubscriptionError> {
            Ok(())
        }
    }

    fn config() -> BrokerConfig {
        BrokerConfig::new("alpaca", "Alpaca", BrokerType::Stock)
            .with_rest_url("https://data.alpaca.markets")
            .with_buffer_size(8)
    }

    #[tokio::test]
    async fn test_start_connects_and_exposes_equity_feed() {
        let broker = StockBroker::new(config(), Arc::new(LoopbackTransport::new()));
        assert!(!broker.is_connected());

        broker.start().await.unwrap();
        assert!(broker.is_connected());
        assert!(broker.health().is_ok());
        assert!(broker.as_derivatives_feed().is_none());

        let feed = broker.as_equity_events_feed().expect("stock exposes equity events");
        assert!(feed.send_dividend(Dividend {
            symbol: "AAPL".to_string(),
            instrument_type: InstrumentType::Stock,
            market_type: MarketType::Stock,
            broker_id: "alpaca".to_string(),
            amount: dec!(0.24),
            ex_date: NaiveDate::from_ymd_opt(2024, 8, 12).unwrap(),
            pay_date: NaiveDate::from_ymd_opt(2024, 8, 15).unwrap(),
            timestamp: Utc::now(),
        }));
        assert_eq!(feed.dividend_channel().drain().len(), 1);

        broker.stop().await.unwrap();
        assert!(!broker.is_connected());
    }

    #[tokio::test]
    async fn test_connect_failure_counts_connection_error() {
        let broker = StockBroker::new(config(), Arc::new(RefusingTransport));

        let err = broker.connect().await.unwrap_err();
        assert!(matches!(err, BrokerError::Connection(ConnectionError::Failed(_))));
        assert!(!broker.is_connected());
        assert_eq!(broker.stats().connection_errors, 1);
    }

    #[tokio::test]
    async fn test_registry_subscriptions() {
        let broker = StockBroker::new(config(), Arc::new(LoopbackTransport::new()));
        broker.connect().await.unwrap();

        let aapl = Subscription::new(InstrumentKey::stock("AAPL"), "alpaca", vec![DataType::Ticker]);
        broker.subscribe(&[aapl.clone(), aapl.clone()]).await.unwrap();
        assert_eq!(broker.subscriptions().len(), 1);

        let never = Subscription::new(InstrumentKey::stock("MSFT"), "alpaca", vec![DataType::Ticker]);
        broker.unsubscribe(&[never]).await.unwrap();
        assert_eq!(broker.subscriptions().len(), 1);

        broker.unsubscribe(&[aapl]).await.unwrap();
        assert!(broker.subscriptions().is_empty());
    }
}
