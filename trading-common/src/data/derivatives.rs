//! Derivatives-only records: funding, mark price and liquidations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::instrument::{InstrumentType, MarketType};
use super::market::impl_market_record;

/// Perpetual funding rate update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub market_type: MarketType,
    pub broker_id: String,
    /// Rate for the current period as a fraction (0.0001 = 1bp)
    pub rate: Decimal,
    pub next_funding_time: DateTime<Utc>,
    pub timestamp: DateTime<Utc>,
}

/// Mark and index price update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkPrice {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub market_type: MarketType,
    pub broker_id: String,
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl MarkPrice {
    /// Mark minus index
    pub fn basis(&self) -> Decimal {
        self.mark_price - self.index_price
    }
}

/// Side of the liquidated position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LiquidationSide {
    Buy,
    Sell,
}

/// Forced liquidation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Liquidation {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub market_type: MarketType,
    pub broker_id: String,
    pub side: LiquidationSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl_market_record!(FundingRate, MarkPrice, Liquidation);
