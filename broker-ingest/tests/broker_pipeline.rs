//! End-to-end broker pipeline: factory, channels, registry and storage flush

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use broker_ingest::broker::{BrokerBase, FeedTransport, LoopbackTransport};
use broker_ingest::connection::ConnectionError;
use broker_ingest::storage::TimeSeriesFilter;
use broker_ingest::subscription::{Subscription, SubscriptionError};
use broker_ingest::{
    BrokerConfig, BrokerError, BrokerFactory, BrokerRegistry, BrokerType, StorageRouter,
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;
use trading_common::data::{DataType, InstrumentKey, Ticker};

fn crypto_config(id: &str, buffer_size: usize) -> BrokerConfig {
    BrokerConfig::new(id, format!("{} feed", id), BrokerType::Crypto)
        .with_websocket_url("wss://stream.example.com/ws")
        .with_buffer_size(buffer_size)
}

fn ticker(symbol: &str, broker: &str, price: Decimal) -> Ticker {
    Ticker::new(&InstrumentKey::crypto_spot(symbol), broker, price, Utc::now())
}

/// Transport whose read loop pushes a fixed script of tickers, then idles
struct ScriptedTransport {
    inner: LoopbackTransport,
    script: Vec<Ticker>,
}

#[async_trait]
impl FeedTransport for ScriptedTransport {
    async fn open(&self, config: &BrokerConfig) -> Result<(), ConnectionError> {
        self.inner.open(config).await
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.inner.close().await
    }

    async fn probe(&self) -> Result<(), ConnectionError> {
        self.inner.probe().await
    }

    async fn subscribe(&self, subscription: &Subscription) -> Result<(), SubscriptionError> {
        self.inner.subscribe(subscription).await
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), SubscriptionError> {
        self.inner.unsubscribe(subscription).await
    }

    async fn run(
        &self,
        base: Arc<BrokerBase>,
        cancel: CancellationToken,
    ) -> Result<(), ConnectionError> {
        for ticker in &self.script {
            base.send_ticker(ticker.clone());
        }
        cancel.cancelled().await;
        Ok(())
    }
}

#[tokio::test]
async fn test_is_connected_before_and_after_start() {
    let broker = BrokerFactory::new()
        .create_broker(crypto_config("binance", 100))
        .unwrap();

    assert!(!broker.is_connected());
    assert!(matches!(broker.health(), Err(BrokerError::NotConnected(_))));

    broker.start().await.unwrap();
    assert!(broker.is_connected());
    assert!(broker.health().is_ok());

    // Second connect is a no-op
    broker.connect().await.unwrap();
    assert!(broker.is_connected());

    broker.stop().await.unwrap();
    assert!(!broker.is_connected());
}

#[tokio::test]
async fn test_buffer_of_ten_keeps_first_ten_of_fifteen_tickers() {
    let broker = BrokerFactory::new()
        .create_broker(crypto_config("binance", 10))
        .unwrap();
    broker.start().await.unwrap();

    for i in 1..=15 {
        broker.send_ticker(ticker("BTCUSDT", "binance", Decimal::from(i)));
    }

    let received = broker.ticker_channel().drain();
    let prices: Vec<Decimal> = received.iter().map(|t| t.price).collect();
    let expected: Vec<Decimal> = (1..=10).map(Decimal::from).collect();
    assert_eq!(prices, expected);

    let stats = broker.stats();
    assert_eq!(stats.tickers_sent, 10);
    assert_eq!(stats.data_errors, 5);

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_overflow_counts_every_dropped_record() {
    let capacity = 4;
    let calls = 9;
    let broker = BrokerFactory::new()
        .create_broker(crypto_config("kraken", capacity))
        .unwrap();

    let accepted = (0..calls)
        .filter(|i| broker.send_ticker(ticker("ETHUSDT", "kraken", Decimal::from(*i))))
        .count();
    assert_eq!(accepted, capacity);

    assert_eq!(broker.ticker_channel().drain().len(), capacity);
    assert_eq!(broker.stats().data_errors, (calls - capacity) as u64);
}

#[tokio::test]
async fn test_transport_read_loop_feeds_channel_in_order() {
    let script: Vec<Ticker> = (1..=3)
        .map(|i| ticker("SOLUSDT", "scripted", Decimal::from(i * 10)))
        .collect();
    let expected = script.clone();

    let factory = BrokerFactory::new().with_transport(BrokerType::Crypto, move |_| {
        Arc::new(ScriptedTransport {
            inner: LoopbackTransport::new(),
            script: script.clone(),
        })
    });
    let broker = factory.create_broker(crypto_config("scripted", 16)).unwrap();
    broker.start().await.unwrap();

    let receiver = broker.ticker_channel();
    let mut received = Vec::new();
    for _ in 0..expected.len() {
        let ticker = tokio::time::timeout(Duration::from_secs(2), receiver.recv())
            .await
            .expect("feed loop should deliver tickers")
            .expect("channel open");
        received.push(ticker);
    }
    assert_eq!(received, expected);

    broker.stop().await.unwrap();
    // Channels are closed once the broker is stopped
    assert!(!broker.send_ticker(ticker("SOLUSDT", "scripted", dec!(1))));
}

#[tokio::test]
async fn test_subscriptions_through_broker() {
    let broker = BrokerFactory::new()
        .create_broker(crypto_config("binance", 100))
        .unwrap();

    let btc = Subscription::new(
        InstrumentKey::crypto_spot("BTCUSDT"),
        "binance",
        vec![DataType::Ticker, DataType::OrderBook],
    );
    assert!(matches!(
        broker.subscribe(&[btc.clone()]).await,
        Err(BrokerError::NotConnected(_))
    ));

    broker.start().await.unwrap();
    broker.subscribe(&[btc.clone()]).await.unwrap();
    broker.subscribe(&[btc.clone()]).await.unwrap();
    assert_eq!(broker.subscriptions().len(), 1);
    assert_eq!(broker.stats().subscriptions, 1);

    let never = Subscription::new(InstrumentKey::crypto_spot("DOGEUSDT"), "binance", vec![]);
    broker.unsubscribe(&[never]).await.unwrap();
    broker.unsubscribe(&[btc]).await.unwrap();
    assert!(broker.subscriptions().is_empty());

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_registry_fleet_to_storage() {
    let registry = BrokerRegistry::default();
    registry.add_broker(crypto_config("binance", 100)).unwrap();
    registry.add_broker(crypto_config("kraken", 100)).unwrap();
    registry.start_all().await.unwrap();
    assert_eq!(registry.get_connected_brokers(), vec!["binance", "kraken"]);

    let storage = StorageRouter::in_memory();
    storage.initialize().await.unwrap();

    for (id, broker) in registry.get_all_brokers() {
        broker.send_ticker(ticker("BTCUSDT", &id, dec!(50000)));
        broker.send_ticker(ticker("ETHUSDT", &id, dec!(3000)));
    }
    let mut flushed = 0;
    for broker in registry.get_all_brokers().values() {
        flushed += storage.flush_broker(broker.as_ref()).await.unwrap().total();
    }
    assert_eq!(flushed, 4);

    let kraken_btc = storage
        .get_tickers(&TimeSeriesFilter::new().symbol("BTCUSDT").broker("kraken"))
        .await
        .unwrap();
    assert_eq!(kraken_btc.len(), 1);
    assert_eq!(kraken_btc[0].price, dec!(50000));

    let stats = registry.get_all_stats();
    assert_eq!(stats["binance"].tickers_sent, 2);

    registry.shutdown().await.unwrap();
    assert!(registry.get_connected_brokers().is_empty());
}
