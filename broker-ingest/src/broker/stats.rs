use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of a broker's counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerStats {
    pub broker_id: String,
    pub connected: bool,
    pub subscriptions: usize,
    pub tickers_sent: u64,
    pub candles_sent: u64,
    pub order_books_sent: u64,
    pub connection_errors: u64,
    /// Records dropped because a channel was full or closed
    pub data_errors: u64,
    pub last_data_at: Option<DateTime<Utc>>,
}

/// Running counters updated from producer tasks
#[derive(Debug, Default)]
pub(crate) struct BrokerCounters {
    pub tickers_sent: AtomicU64,
    pub candles_sent: AtomicU64,
    pub order_books_sent: AtomicU64,
    pub connection_errors: AtomicU64,
    pub data_errors: AtomicU64,
    last_data_at: Mutex<Option<DateTime<Utc>>>,
}

impl BrokerCounters {
    pub fn record_sent(&self, counter: Option<&AtomicU64>) {
        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_data_at.lock() = Some(Utc::now());
    }

    pub fn record_data_error(&self) {
        self.data_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, broker_id: &str, connected: bool, subscriptions: usize) -> BrokerStats {
        BrokerStats {
            broker_id: broker_id.to_string(),
            connected,
            subscriptions,
            tickers_sent: self.tickers_sent.load(Ordering::Relaxed),
            candles_sent: self.candles_sent.load(Ordering::Relaxed),
            order_books_sent: self.order_books_sent.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            data_errors: self.data_errors.load(Ordering::Relaxed),
            last_data_at: *self.last_data_at.lock(),
        }
    }
}
