//! Order book snapshots.
//!
//! Brokers emit full L2 snapshots: bids sorted best (highest) first and
//! asks sorted best (lowest) first.
//!
//! # Example
//!
//! ```
//! use trading_common::data::{BookLevel, InstrumentKey, OrderBook};
//! use rust_decimal_macros::dec;
//! use chrono::Utc;
//!
//! let key = InstrumentKey::crypto_spot("BTCUSDT");
//! let book = OrderBook::new(&key, "binance", Utc::now())
//!     .with_bids(vec![BookLevel::new(dec!(50000), dec!(1.5))])
//!     .with_asks(vec![BookLevel::new(dec!(50002), dec!(0.5))]);
//!
//! assert_eq!(book.spread(), Some(dec!(2)));
//! assert_eq!(book.mid_price(), Some(dec!(50001)));
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::instrument::{InstrumentKey, InstrumentType, MarketType};
use super::market::impl_market_record;

/// A single price level in the order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    /// Total size at this level
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }

    /// Price times size
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// L2 order book snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub market_type: MarketType,
    pub broker_id: String,
    /// Bid levels, best first
    pub bids: Vec<BookLevel>,
    /// Ask levels, best first
    pub asks: Vec<BookLevel>,
    /// Venue sequence number of this snapshot
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl OrderBook {
    /// Create an empty book for an instrument
    pub fn new(key: &InstrumentKey, broker_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: key.symbol.clone(),
            instrument_type: key.instrument_type,
            market_type: key.market_type,
            broker_id: broker_id.into(),
            bids: Vec::new(),
            asks: Vec::new(),
            sequence: 0,
            timestamp,
        }
    }

    pub fn with_bids(mut self, bids: Vec<BookLevel>) -> Self {
        self.bids = bids;
        self
    }

    pub fn with_asks(mut self, asks: Vec<BookLevel>) -> Self {
        self.asks = asks;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn best_bid(&self) -> Option<&BookLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&BookLevel> {
        self.asks.first()
    }

    /// Best ask minus best bid
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// True when either side has no levels
    pub fn is_one_sided(&self) -> bool {
        self.bids.is_empty() || self.asks.is_empty()
    }
}

impl_market_record!(OrderBook);

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_book() -> OrderBook {
        OrderBook::new(&InstrumentKey::crypto_spot("ETHUSDT"), "binance", Utc::now())
            .with_bids(vec![
                BookLevel::new(dec!(3000.00), dec!(2.0)),
                BookLevel::new(dec!(2999.50), dec!(4.0)),
            ])
            .with_asks(vec![
                BookLevel::new(dec!(3000.50), dec!(1.0)),
                BookLevel::new(dec!(3001.00), dec!(3.0)),
            ])
            .with_sequence(42)
    }

    #[test]
    fn test_top_of_book() {
        let book = sample_book();
        assert_eq!(book.best_bid().map(|l| l.price), Some(dec!(3000.00)));
        assert_eq!(book.best_ask().map(|l| l.price), Some(dec!(3000.50)));
        assert_eq!(book.spread(), Some(dec!(0.50)));
        assert_eq!(book.mid_price(), Some(dec!(3000.25)));
        assert!(!book.is_one_sided());
    }

    #[test]
    fn test_empty_book() {
        let book = OrderBook::new(&InstrumentKey::stock("MSFT"), "alpaca", Utc::now());
        assert!(book.spread().is_none());
        assert!(book.mid_price().is_none());
        assert!(book.is_one_sided());
    }

    #[test]
    fn test_level_notional() {
        assert_eq!(BookLevel::new(dec!(100), dec!(2.5)).notional(), dec!(250));
    }
}
