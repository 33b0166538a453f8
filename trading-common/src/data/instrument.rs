//! Instrument identity shared by every market record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of tradable instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    Spot,
    Futures,
    Perpetual,
    Option,
    Stock,
    Etf,
    Forex,
    Index,
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Spot => "spot",
            InstrumentType::Futures => "futures",
            InstrumentType::Perpetual => "perpetual",
            InstrumentType::Option => "option",
            InstrumentType::Stock => "stock",
            InstrumentType::Etf => "etf",
            InstrumentType::Forex => "forex",
            InstrumentType::Index => "index",
        }
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spot" => Ok(InstrumentType::Spot),
            "futures" => Ok(InstrumentType::Futures),
            "perpetual" => Ok(InstrumentType::Perpetual),
            "option" => Ok(InstrumentType::Option),
            "stock" => Ok(InstrumentType::Stock),
            "etf" => Ok(InstrumentType::Etf),
            "forex" => Ok(InstrumentType::Forex),
            "index" => Ok(InstrumentType::Index),
            other => Err(format!("Unknown instrument type: {}", other)),
        }
    }
}

/// Market segment an instrument trades in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    Crypto,
    Stock,
    Forex,
    Commodity,
}

impl MarketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Crypto => "crypto",
            MarketType::Stock => "stock",
            MarketType::Forex => "forex",
            MarketType::Commodity => "commodity",
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "crypto" => Ok(MarketType::Crypto),
            "stock" => Ok(MarketType::Stock),
            "forex" => Ok(MarketType::Forex),
            "commodity" => Ok(MarketType::Commodity),
            other => Err(format!("Unknown market type: {}", other)),
        }
    }
}

/// Identity of an instrument across brokers.
///
/// The canonical string form is `symbol_type_market`, e.g. `BTCUSDT_spot_crypto`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub market_type: MarketType,
}

impl InstrumentKey {
    pub fn new(
        symbol: impl Into<String>,
        instrument_type: InstrumentType,
        market_type: MarketType,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            instrument_type,
            market_type,
        }
    }

    /// Spot crypto pair shorthand
    pub fn crypto_spot(symbol: impl Into<String>) -> Self {
        Self::new(symbol, InstrumentType::Spot, MarketType::Crypto)
    }

    /// Listed equity shorthand
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self::new(symbol, InstrumentType::Stock, MarketType::Stock)
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.symbol, self.instrument_type, self.market_type
        )
    }
}

/// Kinds of market data a subscription can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Ticker,
    Candle,
    OrderBook,
    FundingRate,
    MarkPrice,
    Liquidation,
    Dividend,
    Earnings,
    CorporateAction,
}

/// Static instrument metadata, keyed by symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub market_type: MarketType,
    pub base_asset: Option<String>,
    pub quote_asset: Option<String>,
    pub exchange: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Instrument {
    pub fn new(
        symbol: impl Into<String>,
        instrument_type: InstrumentType,
        market_type: MarketType,
    ) -> Self {
        let now = Utc::now();
        Self {
            symbol: symbol.into(),
            instrument_type,
            market_type,
            base_asset: None,
            quote_asset: None,
            exchange: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_assets(mut self, base: impl Into<String>, quote: impl Into<String>) -> Self {
        self.base_asset = Some(base.into());
        self.quote_asset = Some(quote.into());
        self
    }

    pub fn with_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    pub fn key(&self) -> InstrumentKey {
        InstrumentKey::new(self.symbol.clone(), self.instrument_type, self.market_type)
    }
}
