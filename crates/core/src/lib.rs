//! # Evidence Core
//!
//! Domain types and constants shared by the evidence ledger indexer.
//!
//! The evidence contract emits three kinds of events and tracks one status per
//! evidence record. Everything that has to agree on those names (the database
//! rows, the event decoder, the processors) goes through the types here.
//!
//! ## Contents
//!
//! - **Event kinds**: [`EventKind`], the closed set of contract events
//! - **Statuses**: [`EvidenceStatus`] and [`CheckpointStatus`]
//! - **Addresses**: [`parse_address`] with zero-address rejection
//! - **Constants**: sync defaults and the payload version

#![warn(missing_docs)]

pub mod constants;
pub mod error;
pub mod types;

pub use constants::*;
pub use error::{CoreError, Result};
pub use types::*;

// Re-export Alloy primitives for convenience
pub use alloy_primitives::{Address, B256};
