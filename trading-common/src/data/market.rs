//! Quote and bar records produced by brokers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::instrument::{InstrumentKey, InstrumentType, MarketType};

/// Common accessors for every time-stamped market record.
///
/// Storage filters and routing only touch records through this trait.
pub trait MarketRecord {
    fn symbol(&self) -> &str;
    fn instrument_type(&self) -> InstrumentType;
    fn market_type(&self) -> MarketType;
    fn broker_id(&self) -> &str;
    fn timestamp(&self) -> DateTime<Utc>;

    fn key(&self) -> InstrumentKey {
        InstrumentKey::new(self.symbol(), self.instrument_type(), self.market_type())
    }
}

/// Implements [`MarketRecord`] for structs with the standard identity fields.
macro_rules! impl_market_record {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::data::MarketRecord for $ty {
                fn symbol(&self) -> &str {
                    &self.symbol
                }
                fn instrument_type(&self) -> $crate::data::InstrumentType {
                    self.instrument_type
                }
                fn market_type(&self) -> $crate::data::MarketType {
                    self.market_type
                }
                fn broker_id(&self) -> &str {
                    &self.broker_id
                }
                fn timestamp(&self) -> chrono::DateTime<chrono::Utc> {
                    self.timestamp
                }
            }
        )+
    };
}

pub(crate) use impl_market_record;

/// Best bid/ask and last trade snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub market_type: MarketType,
    pub broker_id: String,
    /// Last traded price
    pub price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub volume_24h: Decimal,
    /// 24h price change in percent
    pub change_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    /// Ticker with zeroed book/volume fields; use struct update syntax for the rest
    pub fn new(
        key: &InstrumentKey,
        broker_id: impl Into<String>,
        price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: key.symbol.clone(),
            instrument_type: key.instrument_type,
            market_type: key.market_type,
            broker_id: broker_id.into(),
            price,
            bid: price,
            ask: price,
            bid_size: Decimal::ZERO,
            ask_size: Decimal::ZERO,
            volume_24h: Decimal::ZERO,
            change_24h: Decimal::ZERO,
            timestamp,
        }
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }
}

/// OHLCV bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub market_type: MarketType,
    pub broker_id: String,
    /// Bar interval, e.g. "1m", "1h", "1d"
    pub interval: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub trade_count: u64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

impl Candle {
    /// Returns true if high/low bracket open and close
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.high >= self.open
            && self.high >= self.close
            && self.open_time <= self.close_time
    }
}

impl_market_record!(Ticker, Candle);
