//! Optional capabilities beyond the core ticker/candle/order book set
//!
//! The registry only sees [`Broker`](super::Broker). Callers that need the
//! richer channels ask for them through `Broker::as_derivatives_feed` or
//! `Broker::as_equity_events_feed`.

use trading_common::data::{
    CorporateAction, Dividend, Earnings, FundingRate, Liquidation, MarkPrice,
};

use super::channels::DataReceiver;

/// Funding, mark price and liquidation streams
pub trait DerivativesFeed: Send + Sync {
    fn funding_rate_channel(&self) -> DataReceiver<FundingRate>;
    fn mark_price_channel(&self) -> DataReceiver<MarkPrice>;
    fn liquidation_channel(&self) -> DataReceiver<Liquidation>;

    fn send_funding_rate(&self, record: FundingRate) -> bool;
    fn send_mark_price(&self, record: MarkPrice) -> bool;
    fn send_liquidation(&self, record: Liquidation) -> bool;
}

/// Dividend, earnings and corporate action streams
pub trait EquityEventsFeed: Send + Sync {
    fn dividend_channel(&self) -> DataReceiver<Dividend>;
    fn earnings_channel(&self) -> DataReceiver<Earnings>;
    fn corporate_action_channel(&self) -> DataReceiver<CorporateAction>;

    fn send_dividend(&self, record: Dividend) -> bool;
    fn send_earnings(&self, record: Earnings) -> bool;
    fn send_corporate_action(&self, record: CorporateAction) -> bool;
}
