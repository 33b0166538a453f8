//! Query filter for time-series reads

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trading_common::data::{Candle, InstrumentType, MarketRecord, MarketType};

/// Restricts a time-series query.
///
/// Each set filter is unrestricted when empty and otherwise matches any of
/// its values. The time range is inclusive at both ends. Results are ordered
/// by timestamp ascending before `offset` and `limit` apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesFilter {
    #[serde(default)]
    pub symbols: HashSet<String>,
    #[serde(default)]
    pub broker_ids: HashSet<String>,
    #[serde(default)]
    pub market_types: HashSet<MarketType>,
    #[serde(default)]
    pub instrument_types: HashSet<InstrumentType>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Candle interval, ignored for other record types
    pub interval: Option<String>,
}

impl TimeSeriesFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbols.insert(symbol.into());
        self
    }

    pub fn symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols.extend(symbols.into_iter().map(Into::into));
        self
    }

    pub fn broker(mut self, broker_id: impl Into<String>) -> Self {
        self.broker_ids.insert(broker_id.into());
        self
    }

    pub fn brokers<I, S>(mut self, broker_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.broker_ids.extend(broker_ids.into_iter().map(Into::into));
        self
    }

    pub fn market_type(mut self, market_type: MarketType) -> Self {
        self.market_types.insert(market_type);
        self
    }

    pub fn instrument_type(mut self, instrument_type: InstrumentType) -> Self {
        self.instrument_types.insert(instrument_type);
        self
    }

    /// Restrict to `start <= timestamp <= end`
    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(interval.into());
        self
    }

    /// Whether a record passes every non-paging restriction
    pub fn matches(&self, record: &impl MarketRecord) -> bool {
        let ts = record.timestamp();
        (self.symbols.is_empty() || self.symbols.contains(record.symbol()))
            && (self.broker_ids.is_empty() || self.broker_ids.contains(record.broker_id()))
            && (self.market_types.is_empty() || self.market_types.contains(&record.market_type()))
            && (self.instrument_types.is_empty()
                || self.instrument_types.contains(&record.instrument_type()))
            && self.start.map_or(true, |start| ts >= start)
            && self.end.map_or(true, |end| ts <= end)
    }

    /// `matches` plus the interval restriction
    pub fn matches_candle(&self, candle: &Candle) -> bool {
        self.matches(candle)
            && self
                .interval
                .as_deref()
                .map_or(true, |interval| candle.interval == interval)
    }

    /// Sort by timestamp and apply `offset` then `limit`
    pub fn page<T: MarketRecord>(&self, mut records: Vec<T>) -> Vec<T> {
        records.sort_by_key(|r| r.timestamp());
        records
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}
