//! Equity corporate events.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::instrument::{InstrumentType, MarketType};
use super::market::impl_market_record;

/// Cash dividend announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dividend {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub market_type: MarketType,
    pub broker_id: String,
    /// Amount per share
    pub amount: Decimal,
    pub ex_date: NaiveDate,
    pub pay_date: NaiveDate,
    pub timestamp: DateTime<Utc>,
}

/// Earnings report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Earnings {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub market_type: MarketType,
    pub broker_id: String,
    /// Fiscal period, e.g. "2024Q3"
    pub period: String,
    pub eps_estimate: Option<Decimal>,
    pub eps_actual: Option<Decimal>,
    pub revenue: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Earnings {
    /// Actual minus estimate, when both are known
    pub fn eps_surprise(&self) -> Option<Decimal> {
        Some(self.eps_actual? - self.eps_estimate?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorporateActionKind {
    Split,
    ReverseSplit,
    Merger,
    Spinoff,
    SymbolChange,
    Delisting,
}

/// Split, merger or other structural event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateAction {
    pub symbol: String,
    pub instrument_type: InstrumentType,
    pub market_type: MarketType,
    pub broker_id: String,
    pub kind: CorporateActionKind,
    /// New shares per old share, for splits
    pub ratio: Option<Decimal>,
    pub description: String,
    pub effective_date: NaiveDate,
    pub timestamp: DateTime<Utc>,
}

impl_market_record!(Dividend, Earnings, CorporateAction);

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_eps_surprise() {
        let mut earnings = Earnings {
            symbol: "AAPL".to_string(),
            instrument_type: InstrumentType::Stock,
            market_type: MarketType::Stock,
            broker_id: "alpaca".to_string(),
            period: "2024Q3".to_string(),
            eps_estimate: Some(dec!(1.35)),
            eps_actual: Some(dec!(1.40)),
            revenue: None,
            timestamp: Utc::now(),
        };
        assert_eq!(earnings.eps_surprise(), Some(dec!(0.05)));

        earnings.eps_actual = None;
        assert!(earnings.eps_surprise().is_none());
    }
}
