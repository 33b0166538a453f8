//! Market data records shared by brokers and storage.

mod derivatives;
mod equity;
mod instrument;
mod market;
mod orderbook;

pub use derivatives::{FundingRate, Liquidation, LiquidationSide, MarkPrice};
pub use equity::{CorporateAction, CorporateActionKind, Dividend, Earnings};
pub use instrument::{DataType, Instrument, InstrumentKey, InstrumentType, MarketType};
pub use market::{Candle, MarketRecord, Ticker};
pub use orderbook::{BookLevel, OrderBook};
