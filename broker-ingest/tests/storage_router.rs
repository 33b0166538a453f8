//! Storage router routing and filter semantics

use std::sync::Arc;

use broker_ingest::storage::{
    InMemoryMetadataStorage, InMemoryTimeSeriesStorage, MetadataStorage, TimeSeriesStorage,
    TimescaleStorage, METADATA_BACKEND, TIMESERIES_BACKEND,
};
use broker_ingest::{BrokerConfig, BrokerType, StorageRouter, Subscription, TimeSeriesFilter};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use trading_common::data::{
    BookLevel, Candle, DataType, Instrument, InstrumentKey, InstrumentType, MarketType, OrderBook,
    Ticker,
};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn sample_ticker(symbol: &str, broker: &str, secs: i64) -> Ticker {
    Ticker {
        bid: dec!(49999.5),
        ask: dec!(50000.5),
        bid_size: dec!(1.25),
        ask_size: dec!(0.75),
        volume_24h: dec!(1234.5678),
        change_24h: dec!(-1.5),
        ..Ticker::new(&InstrumentKey::crypto_spot(symbol), broker, dec!(50000), at(secs))
    }
}

fn sample_candle(symbol: &str, broker: &str, secs: i64) -> Candle {
    Candle {
        symbol: symbol.to_string(),
        instrument_type: InstrumentType::Spot,
        market_type: MarketType::Crypto,
        broker_id: broker.to_string(),
        interval: "1m".to_string(),
        open: dec!(100.0),
        high: dec!(101.5),
        low: dec!(99.25),
        close: dec!(100.75),
        volume: dec!(42.5),
        trade_count: 17,
        open_time: at(secs - 60),
        close_time: at(secs),
        timestamp: at(secs),
    }
}

fn sample_book(symbol: &str, broker: &str, secs: i64) -> OrderBook {
    OrderBook::new(&InstrumentKey::crypto_spot(symbol), broker, at(secs))
        .with_bids(vec![
            BookLevel::new(dec!(99.5), dec!(3)),
            BookLevel::new(dec!(99.0), dec!(5)),
        ])
        .with_asks(vec![BookLevel::new(dec!(100.5), dec!(2))])
        .with_sequence(981)
}

async fn connected_router() -> (
    StorageRouter,
    Arc<InMemoryMetadataStorage>,
    Arc<InMemoryTimeSeriesStorage>,
) {
    let metadata = Arc::new(InMemoryMetadataStorage::new());
    let timeseries = Arc::new(InMemoryTimeSeriesStorage::new());
    let router = StorageRouter::new(metadata.clone(), timeseries.clone());
    router.initialize().await.unwrap();
    (router, metadata, timeseries)
}

#[tokio::test]
async fn test_round_trip_by_symbol_and_broker() {
    let (router, _, _) = connected_router().await;

    let ticker = sample_ticker("BTCUSDT", "binance", 0);
    let candle = sample_candle("BTCUSDT", "binance", 60);
    let book = sample_book("BTCUSDT", "binance", 5);
    router
        .save_tickers(&[ticker.clone(), sample_ticker("BTCUSDT", "kraken", 1)])
        .await
        .unwrap();
    router.save_candles(&[candle.clone()]).await.unwrap();
    router.save_order_books(&[book.clone()]).await.unwrap();

    let filter = TimeSeriesFilter::new().symbol("BTCUSDT").broker("binance");
    assert_eq!(router.get_tickers(&filter).await.unwrap(), vec![ticker]);
    assert_eq!(router.get_candles(&filter).await.unwrap(), vec![candle]);
    assert_eq!(router.get_order_books(&filter).await.unwrap(), vec![book]);
}

#[tokio::test]
async fn test_multi_value_filters_return_every_listed_value() {
    let (router, _, _) = connected_router().await;
    router
        .save_tickers(&[
            sample_ticker("BTCUSDT", "binance", 0),
            sample_ticker("ETHUSDT", "binance", 1),
            sample_ticker("SOLUSDT", "binance", 2),
            sample_ticker("BTCUSDT", "kraken", 3),
            sample_ticker("BTCUSDT", "coinbase", 4),
        ])
        .await
        .unwrap();

    let by_symbol = router
        .get_tickers(&TimeSeriesFilter::new().symbols(["BTCUSDT", "ETHUSDT"]).broker("binance"))
        .await
        .unwrap();
    let symbols: Vec<&str> = by_symbol.iter().map(|t| t.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);

    let by_broker = router
        .get_tickers(&TimeSeriesFilter::new().symbol("BTCUSDT").brokers(["binance", "kraken"]))
        .await
        .unwrap();
    let brokers: Vec<&str> = by_broker.iter().map(|t| t.broker_id.as_str()).collect();
    assert_eq!(brokers, vec!["binance", "kraken"]);

    let window = router
        .get_tickers(&TimeSeriesFilter::new().between(at(1), at(3)))
        .await
        .unwrap();
    assert_eq!(window.len(), 3);
}

#[tokio::test]
async fn test_calls_reach_only_their_backend() {
    let (router, metadata, timeseries) = connected_router().await;

    router
        .save_tickers(&[sample_ticker("BTCUSDT", "binance", 0)])
        .await
        .unwrap();
    let instrument = Instrument::new("BTCUSDT", InstrumentType::Spot, MarketType::Crypto)
        .with_assets("BTC", "USDT")
        .with_exchange("binance");
    router.save_instrument(&instrument).await.unwrap();

    let subscription = Subscription::new(
        InstrumentKey::crypto_spot("BTCUSDT"),
        "binance",
        vec![DataType::Ticker],
    );
    router.save_subscription(&subscription).await.unwrap();
    let config = BrokerConfig::new("binance", "Binance", BrokerType::Crypto)
        .with_websocket_url("wss://stream.example.com/ws");
    router.save_broker_config(&config).await.unwrap();

    assert_eq!(timeseries.stats().await.unwrap().total_rows(), 1);
    assert_eq!(metadata.get_instrument("BTCUSDT").await.unwrap(), Some(instrument));
    assert_eq!(
        metadata.list_subscriptions(Some("binance")).await.unwrap(),
        vec![subscription.clone()]
    );
    assert_eq!(router.list_broker_configs().await.unwrap(), vec![config]);
    assert_eq!(
        router.get_subscription(subscription.id).await.unwrap(),
        Some(subscription)
    );
}

#[tokio::test]
async fn test_health_and_shutdown() {
    let (router, _, _) = connected_router().await;

    let health = router.health().await;
    assert!(health[METADATA_BACKEND].is_ok());
    assert!(health[TIMESERIES_BACKEND].is_ok());

    router.shutdown().await.unwrap();
    let health = router.health().await;
    assert!(health.values().all(|r| r.is_err()));
    assert!(router.get_tickers(&TimeSeriesFilter::new()).await.is_err());
}

#[tokio::test]
async fn test_cleanup_old_data() {
    let (router, _, _) = connected_router().await;
    let now = Utc::now();
    let mut stale = sample_ticker("BTCUSDT", "binance", 0);
    stale.timestamp = now - Duration::days(45);
    let mut fresh = sample_ticker("BTCUSDT", "binance", 0);
    fresh.timestamp = now;
    router.save_tickers(&[stale, fresh.clone()]).await.unwrap();

    assert_eq!(router.cleanup_old_data(Duration::days(30)).await.unwrap(), 1);
    assert_eq!(
        router.get_tickers(&TimeSeriesFilter::new()).await.unwrap(),
        vec![fresh]
    );
}

#[tokio::test]
#[ignore] // Requires DATABASE_URL pointing at a TimescaleDB instance
async fn test_timescale_round_trip() {
    dotenv::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let storage = TimescaleStorage::new(broker_ingest::config::DatabaseSettings::new(url));
    storage.connect().await.unwrap();
    storage.migrate().await.unwrap();

    let broker = format!("it-{}", uuid::Uuid::new_v4());
    let ticker = sample_ticker("BTCUSDT", &broker, 0);
    let candle = sample_candle("BTCUSDT", &broker, 60);
    let book = sample_book("BTCUSDT", &broker, 5);
    storage.save_tickers(&[ticker.clone()]).await.unwrap();
    storage.save_candles(&[candle.clone()]).await.unwrap();
    storage.save_order_books(&[book.clone()]).await.unwrap();

    let filter = TimeSeriesFilter::new().symbol("BTCUSDT").broker(broker.as_str());
    assert_eq!(storage.get_tickers(&filter).await.unwrap(), vec![ticker]);
    assert_eq!(storage.get_candles(&filter).await.unwrap(), vec![candle]);
    assert_eq!(storage.get_order_books(&filter).await.unwrap(), vec![book]);

    let multi = TimeSeriesFilter::new()
        .symbols(["BTCUSDT", "ETHUSDT"])
        .brokers([broker.clone(), "other".to_string()]);
    assert_eq!(storage.get_tickers(&multi).await.unwrap().len(), 1);

    storage.disconnect().await.unwrap();
}
