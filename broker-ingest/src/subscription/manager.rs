//! Subscription manager
//!
//! Tracks per-instrument subscription state for one broker.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use trading_common::data::InstrumentKey;

use super::types::{Subscription, SubscriptionError, SubscriptionInfo, SubscriptionStatus};

/// Source-specific subscribe/unsubscribe work
#[async_trait]
pub trait SubscriptionHooks: Send + Sync {
    async fn on_subscribe(&self, subscription: &Subscription) -> Result<(), SubscriptionError>;

    async fn on_unsubscribe(&self, subscription: &Subscription) -> Result<(), SubscriptionError>;
}

/// Subscription manager
///
/// The table lock is never held across a hook call.
pub struct SubscriptionManager {
    broker_id: String,
    hooks: Arc<dyn SubscriptionHooks>,
    max_subscriptions: usize,
    subscriptions: RwLock<HashMap<InstrumentKey, SubscriptionInfo>>,
}

impl SubscriptionManager {
    pub fn new(
        broker_id: impl Into<String>,
        hooks: Arc<dyn SubscriptionHooks>,
        max_subscriptions: usize,
    ) -> Self {
        Self {
            broker_id: broker_id.into(),
            hooks,
            max_subscriptions,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe a batch of instruments
    ///
    /// Already active instruments are skipped, as are instruments another
    /// batch is still subscribing (`pending`). Every other item is attempted;
    /// the error lists each instrument whose hook failed.
    pub async fn subscribe(&self, subscriptions: &[Subscription]) -> Result<(), SubscriptionError> {
        let mut failures = Vec::new();
        let mut added = 0usize;

        for subscription in subscriptions {
            let key = subscription.key.clone();

            {
                let mut table = self.subscriptions.write();
                match table.get(&key) {
                    Some(existing) if existing.status == SubscriptionStatus::Active => {
                        debug!("Broker {} already subscribed to {}", self.broker_id, key);
                        continue;
                    }
                    Some(existing) if existing.status == SubscriptionStatus::Pending => {
                        debug!(
                            "Broker {} subscription to {} already in progress",
                            self.broker_id, key
                        );
                        continue;
                    }
                    None if table.len() >= self.max_subscriptions => {
                        let err = SubscriptionError::LimitExceeded {
                            limit: self.max_subscriptions,
                        };
                        warn!("Broker {} cannot subscribe to {}: {}", self.broker_id, key, err);
                        failures.push((key.to_string(), err.to_string()));
                        continue;
                    }
                    _ => {}
                }
                table.insert(key.clone(), SubscriptionInfo::pending(subscription.clone()));
            }

            let result = self.hooks.on_subscribe(subscription).await;

            let mut table = self.subscriptions.write();
            let Some(info) = table.get_mut(&key) else {
                continue;
            };
            match result {
                Ok(()) => {
                    info.set_status(SubscriptionStatus::Active);
                    added += 1;
                }
                Err(e) => {
                    warn!("Broker {} failed to subscribe to {}: {}", self.broker_id, key, e);
                    info.set_error(&e);
                    failures.push((key.to_string(), e.to_string()));
                }
            }
        }

        info!(
            "Broker {} subscribed to {} instruments ({} new, {} failed)",
            self.broker_id,
            subscriptions.len(),
            added,
            failures.len()
        );

        batch_result("subscribe", failures)
    }

    /// Unsubscribe a batch of instruments
    ///
    /// Unknown instruments are skipped. A failing hook leaves the record in
    /// place with `error` status so the removal can be retried.
    pub async fn unsubscribe(
        &self,
        subscriptions: &[Subscription],
    ) -> Result<(), SubscriptionError> {
        let mut failures = Vec::new();

        for requested in subscriptions {
            let key = &requested.key;
            let Some(stored) = self.subscriptions.read().get(key).map(|i| i.subscription.clone())
            else {
                debug!("Broker {} not subscribed to {}, skipping", self.broker_id, key);
                continue;
            };

            match self.hooks.on_unsubscribe(&stored).await {
                Ok(()) => {
                    self.subscriptions.write().remove(key);
                    debug!("Broker {} unsubscribed from {}", self.broker_id, key);
                }
                Err(e) => {
                    warn!("Broker {} failed to unsubscribe from {}: {}", self.broker_id, key, e);
                    if let Some(info) = self.subscriptions.write().get_mut(key) {
                        info.set_error(&e);
                    }
                    failures.push((key.to_string(), e.to_string()));
                }
            }
        }

        batch_result("unsubscribe", failures)
    }

    pub fn get_subscription(&self, key: &InstrumentKey) -> Option<SubscriptionInfo> {
        self.subscriptions.read().get(key).cloned()
    }

    pub fn get_all_subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions.read().values().cloned().collect()
    }

    pub fn get_active_subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions
            .read()
            .values()
            .filter(|info| info.status == SubscriptionStatus::Active)
            .map(|info| info.subscription.clone())
            .collect()
    }

    /// Number of records per status
    pub fn get_subscription_count(&self) -> HashMap<SubscriptionStatus, usize> {
        let mut counts = HashMap::new();
        for info in self.subscriptions.read().values() {
            *counts.entry(info.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn active_count(&self) -> usize {
        self.get_subscription_count()
            .get(&SubscriptionStatus::Active)
            .copied()
            .unwrap_or(0)
    }

    /// Count one received record; returns false for unknown instruments
    pub fn update_data_received(&self, key: &InstrumentKey) -> bool {
        match self.subscriptions.write().get_mut(key) {
            Some(info) => {
                info.data_received += 1;
                info.last_data_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Flag an instrument's stream as failed
    pub fn mark_subscription_error(&self, key: &InstrumentKey, error: impl fmt::Display) -> bool {
        match self.subscriptions.write().get_mut(key) {
            Some(info) => {
                warn!("Broker {} subscription {} errored: {}", self.broker_id, key, error);
                info.set_error(error);
                true
            }
            None => false,
        }
    }

    /// Mark an active instrument as no longer streaming
    ///
    /// The source-side subscription is left alone. A later `subscribe` runs
    /// the hook again. Returns false unless the record was active.
    pub fn deactivate(&self, key: &InstrumentKey) -> bool {
        match self.subscriptions.write().get_mut(key) {
            Some(info) if info.status == SubscriptionStatus::Active => {
                info.set_status(SubscriptionStatus::Inactive);
                debug!("Broker {} subscription {} deactivated", self.broker_id, key);
                true
            }
            _ => false,
        }
    }

    /// Drop `inactive` and `error` records last updated more than `max_age` ago
    pub fn cleanup_inactive_subscriptions(&self, max_age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };

        let mut table = self.subscriptions.write();
        let before = table.len();
        table.retain(|_, info| {
            let stale = matches!(
                info.status,
                SubscriptionStatus::Inactive | SubscriptionStatus::Error
            ) && info.updated_at < cutoff;
            !stale
        });
        let removed = before - table.len();

        if removed > 0 {
            info!(
                "Broker {} removed {} stale subscriptions",
                self.broker_id, removed
            );
        }
        removed
    }

    /// Unsubscribe everything that is currently active
    pub async fn shutdown(&self) -> Result<(), SubscriptionError> {
        let active = self.get_active_subscriptions();
        if active.is_empty() {
            return Ok(());
        }
        info!(
            "Broker {} unsubscribing {} active subscriptions",
            self.broker_id,
            active.len()
        );
        self.unsubscribe(&active).await
    }
}

fn batch_result(
    operation: &'static str,
    failures: Vec<(String, String)>,
) -> Result<(), SubscriptionError> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(SubscriptionError::Batch {
            operation,
            failures,
        })
    }
}
