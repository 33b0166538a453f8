//! Source-specific I/O behind concrete brokers
//!
//! A transport opens and closes the upstream session, answers health probes,
//! forwards subscription changes and runs the read loop that pushes records
//! into the broker's channels.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use trading_common::data::InstrumentKey;

use super::base::BrokerBase;
use super::config::BrokerConfig;
use crate::connection::ConnectionError;
use crate::subscription::{Subscription, SubscriptionError};

#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn open(&self, config: &BrokerConfig) -> Result<(), ConnectionError>;

    async fn close(&self) -> Result<(), ConnectionError>;

    /// Cheap liveness check used by periodic health probing
    async fn probe(&self) -> Result<(), ConnectionError>;

    async fn subscribe(&self, subscription: &Subscription) -> Result<(), SubscriptionError>;

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), SubscriptionError>;

    /// Read loop; push records through `base.send_*` until `cancel` fires
    ///
    /// Returning an error reports a lost connection to the owning broker.
    async fn run(
        &self,
        _base: Arc<BrokerBase>,
        cancel: CancellationToken,
    ) -> Result<(), ConnectionError> {
        cancel.cancelled().await;
        Ok(())
    }
}

/// Transport with no upstream; records are pushed by the embedding code
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    open: AtomicBool,
    subscribed: RwLock<HashSet<InstrumentKey>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn subscribed(&self) -> Vec<InstrumentKey> {
        self.subscribed.read().iter().cloned().collect()
    }
}

#[async_trait]
impl FeedTransport for LoopbackTransport {
    async fn open(&self, config: &BrokerConfig) -> Result<(), ConnectionError> {
        debug!("Loopback transport opened for broker {}", config.id);
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectionError> {
        self.open.store(false, Ordering::SeqCst);
        self.subscribed.write().clear();
        Ok(())
    }

    async fn probe(&self) -> Result<(), ConnectionError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected)
        }
    }

    async fn subscribe(&self, subscription: &Subscription) -> Result<(), SubscriptionError> {
        if !self.is_open() {
            return Err(SubscriptionError::NotConnected);
        }
        self.subscribed.write().insert(subscription.key.clone());
        Ok(())
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<(), SubscriptionError> {
        self.subscribed.write().remove(&subscription.key);
        Ok(())
    }
}
