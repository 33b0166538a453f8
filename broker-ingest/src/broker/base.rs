//! Machinery shared by every concrete broker

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use trading_common::data::{
    Candle, CorporateAction, DataType, Dividend, Earnings, FundingRate, InstrumentKey,
    Liquidation, MarkPrice, OrderBook, Ticker,
};

use super::channels::{
    ChannelUsage, DataChannel, DataChannelSet, DataReceiver, DerivativesChannels, EquityChannels,
};
use super::config::BrokerConfig;
use super::error::{BrokerError, BrokerResult};
use super::stats::{BrokerCounters, BrokerStats};
use crate::subscription::Subscription;

/// Entry in the broker's low-level subscription registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSubscription {
    pub key: InstrumentKey,
    pub data_types: Vec<DataType>,
    pub subscribed_at: DateTime<Utc>,
}

impl InstrumentSubscription {
    pub fn new(key: InstrumentKey, data_types: Vec<DataType>) -> Self {
        Self {
            key,
            data_types,
            subscribed_at: Utc::now(),
        }
    }

    /// Registry key, `symbol_type_market`
    pub fn registry_key(&self) -> String {
        self.key.to_string()
    }
}

impl From<&Subscription> for InstrumentSubscription {
    fn from(subscription: &Subscription) -> Self {
        Self::new(subscription.key.clone(), subscription.data_types.clone())
    }
}

/// Connected flag, channels, registry and counters of one broker
///
/// Shared between the broker and its background tasks through an `Arc`.
pub struct BrokerBase {
    config: BrokerConfig,
    connected: AtomicBool,
    channels: DataChannelSet,
    derivatives: Option<Arc<DerivativesChannels>>,
    equity: Option<Arc<EquityChannels>>,
    registry: RwLock<HashMap<String, InstrumentSubscription>>,
    counters: BrokerCounters,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl BrokerBase {
    pub fn new(config: BrokerConfig) -> Self {
        let capacity = config.buffer.buffer_size;
        Self {
            config,
            connected: AtomicBool::new(false),
            channels: DataChannelSet::new(capacity),
            derivatives: None,
            equity: None,
            registry: RwLock::new(HashMap::new()),
            counters: BrokerCounters::default(),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Attach funding, mark price and liquidation channels
    pub fn with_derivatives(mut self, channels: Arc<DerivativesChannels>) -> Self {
        self.derivatives = Some(channels);
        self
    }

    /// Attach dividend, earnings and corporate action channels
    pub fn with_equity_events(mut self, channels: Arc<EquityChannels>) -> Self {
        self.equity = Some(channels);
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        let was = self.connected.swap(connected, Ordering::SeqCst);
        if was != connected {
            debug!("Broker {} connected flag set to {}", self.config.id, connected);
        }
    }

    pub fn record_connection_error(&self) {
        self.counters.record_connection_error();
    }

    // =================================================================
    // Data channels
    // =================================================================

    /// Offer a record to a channel; drops and counts it if the channel is full or closed
    pub fn offer<T>(&self, channel: &DataChannel<T>, record: T) -> bool {
        self.offer_counted(channel, record, None)
    }

    fn offer_counted<T>(
        &self,
        channel: &DataChannel<T>,
        record: T,
        sent: Option<&AtomicU64>,
    ) -> bool {
        match channel.try_send(record) {
            Ok(()) => {
                self.counters.record_sent(sent);
                true
            }
            Err(e) => {
                self.counters.record_data_error();
                warn!("Broker {} dropped record: {}", self.config.id, e);
                false
            }
        }
    }

    pub fn send_ticker(&self, ticker: Ticker) -> bool {
        self.offer_counted(
            &self.channels.ticker,
            ticker,
            Some(&self.counters.tickers_sent),
        )
    }

    pub fn send_candle(&self, candle: Candle) -> bool {
        self.offer_counted(
            &self.channels.candle,
            candle,
            Some(&self.counters.candles_sent),
        )
    }

    pub fn send_order_book(&self, order_book: OrderBook) -> bool {
        self.offer_counted(
            &self.channels.order_book,
            order_book,
            Some(&self.counters.order_books_sent),
        )
    }

    pub fn send_funding_rate(&self, record: FundingRate) -> bool {
        match &self.derivatives {
            Some(channels) => self.offer(&channels.funding_rate, record),
            None => self.unsupported("funding_rate"),
        }
    }

    pub fn send_mark_price(&self, record: MarkPrice) -> bool {
        match &self.derivatives {
            Some(channels) => self.offer(&channels.mark_price, record),
            None => self.unsupported("mark_price"),
        }
    }

    pub fn send_liquidation(&self, record: Liquidation) -> bool {
        match &self.derivatives {
            Some(channels) => self.offer(&channels.liquidation, record),
            None => self.unsupported("liquidation"),
        }
    }

    pub fn send_dividend(&self, record: Dividend) -> bool {
        match &self.equity {
            Some(channels) => self.offer(&channels.dividend, record),
            None => self.unsupported("dividend"),
        }
    }

    pub fn send_earnings(&self, record: Earnings) -> bool {
        match &self.equity {
            Some(channels) => self.offer(&channels.earnings, record),
            None => self.unsupported("earnings"),
        }
    }

    pub fn send_corporate_action(&self, record: CorporateAction) -> bool {
        match &self.equity {
            Some(channels) => self.offer(&channels.corporate_action, record),
            None => self.unsupported("corporate_action"),
        }
    }

    fn unsupported(&self, channel: &str) -> bool {
        self.counters.record_data_error();
        warn!(
            "Broker {} has no {} channel, record dropped",
            self.config.id, channel
        );
        false
    }

    pub fn ticker_channel(&self) -> DataReceiver<Ticker> {
        self.channels.ticker.receiver()
    }

    pub fn candle_channel(&self) -> DataReceiver<Candle> {
        self.channels.candle.receiver()
    }

    pub fn order_book_channel(&self) -> DataReceiver<OrderBook> {
        self.channels.order_book.receiver()
    }

    pub fn derivatives(&self) -> Option<&Arc<DerivativesChannels>> {
        self.derivatives.as_ref()
    }

    pub fn equity_events(&self) -> Option<&Arc<EquityChannels>> {
        self.equity.as_ref()
    }

    /// Fill level of every channel this broker owns
    pub fn channel_usage(&self) -> Vec<ChannelUsage> {
        let mut usage = self.channels.usage();
        if let Some(derivatives) = &self.derivatives {
            usage.extend(derivatives.usage());
        }
        if let Some(equity) = &self.equity {
            usage.extend(equity.usage());
        }
        usage
    }

    // =================================================================
    // Subscription registry
    // =================================================================

    pub fn subscribe(&self, subscriptions: &[InstrumentSubscription]) {
        let mut registry = self.registry.write();
        for subscription in subscriptions {
            registry.insert(subscription.registry_key(), subscription.clone());
        }
        debug!(
            "Broker {} registry now holds {} instruments",
            self.config.id,
            registry.len()
        );
    }

    pub fn unsubscribe(&self, subscriptions: &[InstrumentSubscription]) {
        let mut registry = self.registry.write();
        for subscription in subscriptions {
            registry.remove(&subscription.registry_key());
        }
    }

    pub fn is_subscribed(&self, key: &InstrumentKey) -> bool {
        self.registry.read().contains_key(&key.to_string())
    }

    pub fn subscriptions(&self) -> Vec<InstrumentSubscription> {
        self.registry.read().values().cloned().collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.read().len()
    }

    // =================================================================
    // Health, stats, tasks
    // =================================================================

    /// Fails when disconnected or when any channel is nearly full
    pub fn health(&self) -> BrokerResult<()> {
        if !self.is_connected() {
            return Err(BrokerError::NotConnected(self.config.id.clone()));
        }
        if let Some(usage) = self.channel_usage().into_iter().find(|u| u.is_saturated()) {
            return Err(BrokerError::Backpressure {
                channel: usage.channel,
                len: usage.len,
                capacity: usage.capacity,
            });
        }
        Ok(())
    }

    pub fn stats(&self) -> BrokerStats {
        self.stats_with_connected(self.is_connected())
    }

    pub fn stats_with_connected(&self, connected: bool) -> BrokerStats {
        self.counters
            .snapshot(&self.config.id, connected, self.subscription_count())
    }

    /// Token cancelled when the broker is closed
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Run a background task that `close` waits for
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and await background tasks, then close every channel
    ///
    /// Records already buffered stay readable; later sends are dropped.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        self.channels.close();
        if let Some(derivatives) = &self.derivatives {
            derivatives.close();
        }
        if let Some(equity) = &self.equity {
            equity.close();
        }
        self.set_connected(false);
        info!("Broker {} closed", self.config.id);
    }
}
