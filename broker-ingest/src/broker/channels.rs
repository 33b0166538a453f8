//! Bounded data channels with a drop-newest backpressure policy
//!
//! Producers call [`DataChannel::try_send`], which never blocks. Consumers get
//! cloneable [`DataReceiver`] handles; every clone drains the same queue.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use trading_common::data::{
    Candle, CorporateAction, Dividend, Earnings, FundingRate, Liquidation, MarkPrice, OrderBook,
    Ticker,
};
use trading_common::error::ChannelError;

/// Fill ratio at which a channel is reported as unhealthy
pub const CHANNEL_WARN_THRESHOLD: f64 = 0.9;

/// Shared consumer handle for one data channel
pub struct DataReceiver<T> {
    channel: &'static str,
    inner: Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for DataReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> DataReceiver<T> {
    pub fn channel(&self) -> &'static str {
        self.channel
    }

    /// Wait for the next record; `None` once the channel is closed and drained
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }

    /// Take the next buffered record without waiting
    ///
    /// Returns `None` if the queue is empty or another consumer is mid-receive.
    pub fn try_recv(&self) -> Option<T> {
        let mut rx = self.inner.try_lock().ok()?;
        rx.try_recv().ok()
    }

    /// Take every record currently buffered
    pub fn drain(&self) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(record) = self.try_recv() {
            out.push(record);
        }
        out
    }
}

impl<T> std::fmt::Debug for DataReceiver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataReceiver")
            .field("channel", &self.channel)
            .finish()
    }
}

/// One bounded queue
pub struct DataChannel<T> {
    name: &'static str,
    capacity: usize,
    sender: RwLock<Option<mpsc::Sender<T>>>,
    receiver: DataReceiver<T>,
}

impl<T> DataChannel<T> {
    /// `capacity` must be non-zero
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name,
            capacity: capacity.max(1),
            sender: RwLock::new(Some(tx)),
            receiver: DataReceiver {
                channel: name,
                inner: Arc::new(tokio::sync::Mutex::new(rx)),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue without blocking
    pub fn try_send(&self, record: T) -> Result<(), ChannelError> {
        let guard = self.sender.read();
        let Some(tx) = guard.as_ref() else {
            return Err(ChannelError::Closed { channel: self.name });
        };
        tx.try_send(record).map_err(|e| match e {
            TrySendError::Full(_) => ChannelError::Full {
                channel: self.name,
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => ChannelError::Closed { channel: self.name },
        })
    }

    pub fn receiver(&self) -> DataReceiver<T> {
        self.receiver.clone()
    }

    /// Records currently buffered
    pub fn len(&self) -> usize {
        match self.sender.read().as_ref() {
            Some(tx) => tx.max_capacity() - tx.capacity(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill ratio in `[0.0, 1.0]`
    pub fn utilization(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Drop the sender; buffered records stay readable
    pub fn close(&self) {
        self.sender.write().take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }
}

/// Fill level of one channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelUsage {
    pub channel: &'static str,
    pub len: usize,
    pub capacity: usize,
}

impl ChannelUsage {
    fn of<T>(channel: &DataChannel<T>) -> Self {
        Self {
            channel: channel.name(),
            len: channel.len(),
            capacity: channel.capacity(),
        }
    }

    pub fn utilization(&self) -> f64 {
        self.len as f64 / self.capacity as f64
    }

    pub fn is_saturated(&self) -> bool {
        self.utilization() >= CHANNEL_WARN_THRESHOLD
    }
}

/// Ticker, candle and order book channels every broker exposes
pub struct DataChannelSet {
    pub ticker: DataChannel<Ticker>,
    pub candle: DataChannel<Candle>,
    pub order_book: DataChannel<OrderBook>,
}

impl DataChannelSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            ticker: DataChannel::new("ticker", capacity),
            candle: DataChannel::new("candle", capacity),
            order_book: DataChannel::new("order_book", capacity),
        }
    }

    pub fn usage(&self) -> Vec<ChannelUsage> {
        vec![
            ChannelUsage::of(&self.ticker),
            ChannelUsage::of(&self.candle),
            ChannelUsage::of(&self.order_book),
        ]
    }

    pub fn close(&self) {
        self.ticker.close();
        self.candle.close();
        self.order_book.close();
    }
}

/// Extra channels for derivatives venues
pub struct DerivativesChannels {
    pub funding_rate: DataChannel<FundingRate>,
    pub mark_price: DataChannel<MarkPrice>,
    pub liquidation: DataChannel<Liquidation>,
}

impl DerivativesChannels {
    pub fn new(capacity: usize) -> Self {
        Self {
            funding_rate: DataChannel::new("funding_rate", capacity),
            mark_price: DataChannel::new("mark_price", capacity),
            liquidation: DataChannel::new("liquidation", capacity),
        }
    }

    pub fn usage(&self) -> Vec<ChannelUsage> {
        vec![
            ChannelUsage::of(&self.funding_rate),
            ChannelUsage::of(&self.mark_price),
            ChannelUsage::of(&self.liquidation),
        ]
    }

    pub fn close(&self) {
        self.funding_rate.close();
        self.mark_price.close();
        self.liquidation.close();
    }
}

/// Extra channels for equity corporate events
pub struct EquityChannels {
    pub dividend: DataChannel<Dividend>,
    pub earnings: DataChannel<Earnings>,
    pub corporate_action: DataChannel<CorporateAction>,
}

impl EquityChannels {
    pub fn new(capacity: usize) -> Self {
        Self {
            dividend: DataChannel::new("dividend", capacity),
            earnings: DataChannel::new("earnings", capacity),
            corporate_action: DataChannel::new("corporate_action", capacity),
        }
    }

    pub fn usage(&self) -> Vec<ChannelUsage> {
        vec![
            ChannelUsage::of(&self.dividend),
            ChannelUsage::of(&self.earnings),
            ChannelUsage::of(&self.corporate_action),
        ]
    }

    pub fn close(&self) {
        self.dividend.close();
        self.earnings.close();
        self.corporate_action.close();
    }
}
