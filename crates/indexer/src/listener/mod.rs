//! Event listeners for the evidence contract.
//!
//! This module provides:
//! - Historical sync: batch replay of a closed block range
//! - Live subscriptions: one stream per event kind from the checkpoint onward

pub mod historical;
pub mod live;

pub use historical::{HistoricalSync, SyncReport};
pub use live::{LiveSubscriptionManager, SubscriptionState};
