//! Subscription lifecycle
//!
//! [`SubscriptionManager`] keeps one record per instrument and walks it through
//! `pending -> active | error`. Batches are processed item by item; one failing
//! instrument never blocks the rest.

mod manager;
mod types;

pub use manager::{SubscriptionHooks, SubscriptionManager};
pub use types::{Subscription, SubscriptionError, SubscriptionInfo, SubscriptionStatus};
