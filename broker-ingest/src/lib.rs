//! # Broker Ingest
//!
//! Core of the streaming market data ingestion pipeline.
//!
//! ## Features
//!
//! - **Broker abstraction**: A common [`Broker`] trait over crypto and stock feeds, with
//!   bounded per-type data channels that drop the newest record under backpressure
//! - **Connection lifecycle**: [`ConnectionManager`] with automatic reconnection and
//!   periodic health probing
//! - **Subscription lifecycle**: [`SubscriptionManager`] tracking per-instrument status with
//!   partial-failure handling for batches
//! - **Registry and factory**: build brokers from configuration and drive them as a fleet
//! - **Storage routing**: [`StorageRouter`] sends market records to a time-series backend
//!   and reference data to a metadata backend
//!
//! ## Architecture
//!
//! Concrete brokers own their I/O loops and push records through the base's `send_*`
//! methods. Consumers drain the channels exposed by the broker and hand records to the
//! storage router. Ordering is FIFO per broker and channel; nothing stronger is promised.

pub mod broker;
pub mod config;
pub mod connection;
pub mod storage;
pub mod subscription;

// Re-export commonly used types
pub use broker::{
    Broker, BrokerConfig, BrokerError, BrokerFactory, BrokerRegistry, BrokerResult, BrokerStats,
    BrokerType, DataReceiver,
};
pub use crate::config::Settings;
pub use connection::{ConnectionError, ConnectionInfo, ConnectionManager, ConnectionState};
pub use storage::{StorageError, StorageRouter, TimeSeriesFilter};
pub use subscription::{Subscription, SubscriptionError, SubscriptionManager, SubscriptionStatus};
