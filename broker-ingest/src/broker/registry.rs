//! Broker registry
//!
//! Owns every live broker by id. Fleet operations are best-effort: each broker
//! is attempted and failures are reported together.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::config::BrokerConfig;
use super::error::{BrokerError, BrokerResult};
use super::factory::BrokerFactory;
use super::stats::BrokerStats;
use super::traits::Broker;

pub struct BrokerRegistry {
    factory: BrokerFactory,
    brokers: RwLock<HashMap<String, Arc<dyn Broker>>>,
}

impl BrokerRegistry {
    pub fn new(factory: BrokerFactory) -> Self {
        Self {
            factory,
            brokers: RwLock::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &BrokerFactory {
        &self.factory
    }

    /// Build and register a broker; fails if the id is taken
    pub fn add_broker(&self, config: BrokerConfig) -> BrokerResult<Arc<dyn Broker>> {
        let id = config.id.clone();
        if self.brokers.read().contains_key(&id) {
            return Err(BrokerError::AlreadyExists(id));
        }

        let broker = self.factory.create_broker(config)?;

        let mut brokers = self.brokers.write();
        if brokers.contains_key(&id) {
            return Err(BrokerError::AlreadyExists(id));
        }
        brokers.insert(id.clone(), Arc::clone(&broker));
        info!("Registered broker {} ({})", id, broker.broker_type());
        Ok(broker)
    }

    /// Stop and unregister a broker; stop failures are logged only
    pub async fn remove_broker(&self, id: &str) -> BrokerResult<()> {
        let broker = self
            .get_broker(id)
            .ok_or_else(|| BrokerError::NotFound(id.to_string()))?;

        if let Err(e) = broker.stop().await {
            warn!("Failed to stop broker {} during removal: {}", id, e);
        }

        self.brokers.write().remove(id);
        info!("Removed broker {}", id);
        Ok(())
    }

    pub fn get_broker(&self, id: &str) -> Option<Arc<dyn Broker>> {
        self.brokers.read().get(id).cloned()
    }

    /// Copy of the id -> broker map
    pub fn get_all_brokers(&self) -> HashMap<String, Arc<dyn Broker>> {
        self.brokers.read().clone()
    }

    pub fn len(&self) -> usize {
        self.brokers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.brokers.read().is_empty()
    }

    fn snapshot(&self) -> Vec<(String, Arc<dyn Broker>)> {
        let mut brokers: Vec<_> = self
            .brokers
            .read()
            .iter()
            .map(|(id, broker)| (id.clone(), Arc::clone(broker)))
            .collect();
        brokers.sort_by(|a, b| a.0.cmp(&b.0));
        brokers
    }

    /// Start every broker
    pub async fn start_all(&self) -> BrokerResult<()> {
        let mut failures = Vec::new();
        for (id, broker) in self.snapshot() {
            if let Err(e) = broker.start().await {
                warn!("Failed to start broker {}: {}", id, e);
                failures.push((id, e));
            }
        }
        aggregate("start_all", failures)
    }

    /// Stop every broker
    pub async fn stop_all(&self) -> BrokerResult<()> {
        let mut failures = Vec::new();
        for (id, broker) in self.snapshot() {
            if let Err(e) = broker.stop().await {
                warn!("Failed to stop broker {}: {}", id, e);
                failures.push((id, e));
            }
        }
        aggregate("stop_all", failures)
    }

    /// Health of each broker by id
    pub fn health(&self) -> HashMap<String, BrokerResult<()>> {
        self.snapshot()
            .into_iter()
            .map(|(id, broker)| {
                let health = broker.health();
                (id, health)
            })
            .collect()
    }

    /// Ids of connected brokers, sorted
    pub fn get_connected_brokers(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|(_, broker)| broker.is_connected())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn get_all_stats(&self) -> HashMap<String, BrokerStats> {
        self.snapshot()
            .into_iter()
            .map(|(id, broker)| {
                let stats = broker.stats();
                (id, stats)
            })
            .collect()
    }

    pub async fn shutdown(&self) -> BrokerResult<()> {
        info!("Shutting down broker registry ({} brokers)", self.len());
        let result = self.stop_all().await;
        match &result {
            Ok(()) => info!("Broker registry shut down"),
            Err(e) => warn!("Broker registry shut down with errors: {}", e),
        }
        result
    }
}

impl Default for BrokerRegistry {
    fn default() -> Self {
        Self::new(BrokerFactory::new())
    }
}

fn aggregate(operation: &'static str, failures: Vec<(String, BrokerError)>) -> BrokerResult<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(BrokerError::Aggregate {
            operation,
            failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerType;

    fn crypto(id: &str) -> BrokerConfig {
        let mut config = BrokerConfig::new(id, id, BrokerType::Crypto)
            .with_websocket_url("wss://example.invalid/ws");
        config.connection.health_check_interval = None;
        config
    }

    #[tokio::test]
    async fn test_add_rejects_duplicates() {
        let registry = BrokerRegistry::default();
        registry.add_broker(crypto("binance")).unwrap();

        let err = registry.add_broker(crypto("binance")).err().unwrap();
        assert_eq!(err, BrokerError::AlreadyExists("binance".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_missing_fails() {
        let registry = BrokerRegistry::default();
        assert_eq!(
            registry.remove_broker("nope").await,
            Err(BrokerError::NotFound("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fleet_lifecycle() {
        let registry = BrokerRegistry::default();
        registry.add_broker(crypto("binance")).unwrap();
        registry.add_broker(crypto("kraken")).unwrap();

        let health = registry.health();
        assert_eq!(health.len(), 2);
        assert!(health.values().all(|h| h.is_err()));
        assert!(registry.get_connected_brokers().is_empty());

        registry.start_all().await.unwrap();
        assert_eq!(registry.get_connected_brokers(), vec!["binance", "kraken"]);
        assert!(registry.health().values().all(|h| h.is_ok()));
        assert_eq!(registry.get_all_stats().len(), 2);

        registry.remove_broker("kraken").await.unwrap();
        assert!(registry.get_broker("kraken").is_none());

        registry.shutdown().await.unwrap();
        assert!(registry.get_connected_brokers().is_empty());
        assert_eq!(registry.get_all_brokers().len(), 1);
    }
}
