//! Broker abstraction
//!
//! - [`Broker`]: core trait every market data source implements
//! - [`BrokerBase`]: shared connected flag, channels, registry and counters
//! - [`CryptoBroker`] / [`StockBroker`]: concrete brokers over a [`FeedTransport`]
//! - [`BrokerFactory`] / [`BrokerRegistry`]: build brokers from config and manage the fleet

mod base;
mod capabilities;
mod channels;
mod config;
mod crypto;
mod error;
mod factory;
mod registry;
mod stats;
mod stock;
mod traits;
mod transport;

pub use base::{BrokerBase, InstrumentSubscription};
pub use capabilities::{DerivativesFeed, EquityEventsFeed};
pub use channels::{
    ChannelUsage, DataChannel, DataChannelSet, DataReceiver, DerivativesChannels, EquityChannels,
    CHANNEL_WARN_THRESHOLD,
};
pub use self::config::{
    BrokerConfig, BrokerType, BufferConfig, ConnectionConfig, LimitsConfig,
};
pub use crypto::CryptoBroker;
pub use error::{BrokerError, BrokerResult};
pub use factory::{BrokerFactory, TransportBuilder};
pub use registry::BrokerRegistry;
pub use stats::BrokerStats;
pub use stock::StockBroker;
pub use traits::Broker;
pub use transport::{FeedTransport, LoopbackTransport};
