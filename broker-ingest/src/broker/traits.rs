//! Broker trait definitions

use async_trait::async_trait;
use trading_common::data::{Candle, OrderBook, Ticker};

use super::base::InstrumentSubscription;
use super::capabilities::{DerivativesFeed, EquityEventsFeed};
use super::channels::DataReceiver;
use super::config::{BrokerConfig, BrokerType};
use super::error::BrokerResult;
use super::stats::BrokerStats;
use crate::subscription::Subscription;

/// Core interface of a market data source
///
/// Every broker exposes ticker, candle and order book channels. Sources with
/// richer streams also answer one of the capability accessors.
#[async_trait]
pub trait Broker: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn broker_type(&self) -> BrokerType;

    fn config(&self) -> &BrokerConfig;

    /// Connect; a no-op when already connected
    async fn connect(&self) -> BrokerResult<()>;

    async fn disconnect(&self) -> BrokerResult<()>;

    fn is_connected(&self) -> bool;

    /// Connect if needed and start the feed loop
    async fn start(&self) -> BrokerResult<()>;

    /// Disconnect, stop background tasks and close the channels
    ///
    /// A stopped broker cannot be started again.
    async fn stop(&self) -> BrokerResult<()>;

    async fn subscribe(&self, subscriptions: &[Subscription]) -> BrokerResult<()>;

    async fn unsubscribe(&self, subscriptions: &[Subscription]) -> BrokerResult<()>;

    fn subscriptions(&self) -> Vec<InstrumentSubscription>;

    fn ticker_channel(&self) -> DataReceiver<Ticker>;

    fn candle_channel(&self) -> DataReceiver<Candle>;

    fn order_book_channel(&self) -> DataReceiver<OrderBook>;

    fn send_ticker(&self, ticker: Ticker) -> bool;

    fn send_candle(&self, candle: Candle) -> bool;

    fn send_order_book(&self, order_book: OrderBook) -> bool;

    fn health(&self) -> BrokerResult<()>;

    fn stats(&self) -> BrokerStats;

    fn as_derivatives_feed(&self) -> Option<&dyn DerivativesFeed> {
        None
    }

    fn as_equity_events_feed(&self) -> Option<&dyn EquityEventsFeed> {
        None
    }
}
