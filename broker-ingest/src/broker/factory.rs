//! Broker factory for building brokers from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use trading_common::error::ConfigurationError;

use super::config::{BrokerConfig, BrokerType};
use super::crypto::CryptoBroker;
use super::error::BrokerResult;
use super::stock::StockBroker;
use super::traits::Broker;
use super::transport::{FeedTransport, LoopbackTransport};

/// Builds the transport for one broker instance
pub type TransportBuilder = Arc<dyn Fn(&BrokerConfig) -> Arc<dyn FeedTransport> + Send + Sync>;

const SUPPORTED_TYPES: [BrokerType; 2] = [BrokerType::Crypto, BrokerType::Stock];

/// Broker factory
///
/// Uses [`LoopbackTransport`] unless a transport builder is registered for
/// the broker's type.
#[derive(Clone, Default)]
pub struct BrokerFactory {
    transports: HashMap<BrokerType, TransportBuilder>,
}

impl BrokerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom transport for every broker of `broker_type`
    pub fn with_transport<F>(mut self, broker_type: BrokerType, builder: F) -> Self
    where
        F: Fn(&BrokerConfig) -> Arc<dyn FeedTransport> + Send + Sync + 'static,
    {
        self.transports.insert(broker_type, Arc::new(builder));
        self
    }

    pub fn supported_types(&self) -> &'static [BrokerType] {
        &SUPPORTED_TYPES
    }

    pub fn is_supported(&self, broker_type: BrokerType) -> bool {
        SUPPORTED_TYPES.contains(&broker_type)
    }

    /// Validate a configuration without building anything
    pub fn validate_config(&self, config: &BrokerConfig) -> Result<(), ConfigurationError> {
        config.validate()?;
        if !self.is_supported(config.broker_type) {
            return Err(ConfigurationError::Unsupported {
                kind: "broker type",
                value: config.broker_type.to_string(),
            });
        }
        Ok(())
    }

    /// Build a broker for an enabled, valid configuration
    pub fn create_broker(&self, config: BrokerConfig) -> BrokerResult<Arc<dyn Broker>> {
        if !config.enabled {
            return Err(ConfigurationError::Disabled(format!("Broker {}", config.id)).into());
        }
        self.validate_config(&config)?;

        let transport = match self.transports.get(&config.broker_type) {
            Some(builder) => (builder.as_ref())(&config),
            None => Arc::new(LoopbackTransport::new()),
        };

        let broker: Arc<dyn Broker> = match config.broker_type {
            BrokerType::Crypto => Arc::new(CryptoBroker::new(config, transport)),
            BrokerType::Stock => Arc::new(StockBroker::new(config, transport)),
            other => {
                return Err(ConfigurationError::Unsupported {
                    kind: "broker type",
                    value: other.to_string(),
                }
                .into())
            }
        };
        Ok(broker)
    }
}

impl std::fmt::Debug for BrokerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerFactory")
            .field("custom_transports", &self.transports.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;

    fn crypto_config() -> BrokerConfig {
        BrokerConfig::new("binance", "Binance", BrokerType::Crypto)
            .with_websocket_url("wss://stream.binance.com:9443/ws")
    }

    #[test]
    fn test_supported_types() {
        let factory = BrokerFactory::new();
        assert_eq!(
            factory.supported_types(),
            &[BrokerType::Crypto, BrokerType::Stock]
        );
        assert!(!factory.is_supported(BrokerType::Forex));
    }

    #[test]
    fn test_create_dispatches_on_type() {
        let factory = BrokerFactory::new();

        let crypto = factory.create_broker(crypto_config()).unwrap();
        assert_eq!(crypto.broker_type(), BrokerType::Crypto);
        assert!(crypto.as_derivatives_feed().is_some());

        let stock = factory
            .create_broker(
                BrokerConfig::new("alpaca", "Alpaca", BrokerType::Stock)
                    .with_rest_url("https://data.alpaca.markets"),
            )
            .unwrap();
        assert_eq!(stock.broker_type(), BrokerType::Stock);
        assert!(stock.as_equity_events_feed().is_some());
    }

    #[test]
    fn test_disabled_and_unsupported_are_rejected() {
        let factory = BrokerFactory::new();

        let err = factory
            .create_broker(crypto_config().with_enabled(false))
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BrokerError::Configuration(ConfigurationError::Disabled(_))
        ));

        let forex = BrokerConfig::new("oanda", "OANDA", BrokerType::Forex)
            .with_rest_url("https://api-fxpractice.oanda.com");
        let err = factory.create_broker(forex).err().unwrap();
        assert!(matches!(
            err,
            BrokerError::Configuration(ConfigurationError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let factory = BrokerFactory::new();
        let config = crypto_config().with_buffer_size(0);
        assert!(factory.validate_config(&config).is_err());
        assert!(factory.create_broker(config).is_err());
    }

    #[tokio::test]
    async fn test_custom_transport_is_used() {
        let transport = Arc::new(LoopbackTransport::new());
        let shared = Arc::clone(&transport);
        let factory = BrokerFactory::new().with_transport(BrokerType::Crypto, move |_| {
            Arc::clone(&shared) as Arc<dyn FeedTransport>
        });

        let broker = factory.create_broker(crypto_config()).unwrap();
        broker.connect().await.unwrap();
        assert!(transport.is_open());
    }
}
