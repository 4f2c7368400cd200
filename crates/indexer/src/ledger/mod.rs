//! Access to the chain that hosts the evidence contract.
//!
//! The rest of the indexer only sees the [`LedgerClient`] trait:
//! - [`provider::RpcLedgerClient`] talks to a JSON-RPC node through alloy
//! - [`memory::InMemoryLedger`] is a scripted chain for tests
//!
//! Live subscriptions are built on top of any client by
//! [`subscription::LogSubscription`].

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use evidence_core::EventKind;

use crate::error::LedgerError;

pub mod contract;
pub mod events;
pub mod memory;
pub mod provider;
pub mod subscription;

pub use contract::CanonicalEvidence;
pub use events::{EventPayload, LedgerEvent};
pub use memory::InMemoryLedger;
pub use provider::RpcLedgerClient;
pub use subscription::{LogSubscription, SubscriptionItem};

/// Result type alias for ledger calls.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Read-only view of the ledger needed for ingestion.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Height of the latest block.
    async fn current_block_height(&self) -> LedgerResult<u64>;

    /// Decoded contract events in `[from_block, to_block]`, in chain order.
    ///
    /// `kind` narrows the topic filter to one event; `None` matches all three.
    async fn logs_in_range(
        &self,
        contract: Address,
        kind: Option<EventKind>,
        from_block: u64,
        to_block: u64,
    ) -> LedgerResult<Vec<LedgerEvent>>;

    /// Every event of interest emitted by `contract` in one transaction.
    async fn receipt_events(&self, contract: Address, tx_hash: B256)
        -> LedgerResult<Vec<LedgerEvent>>;

    /// Unix timestamp of a block.
    async fn block_timestamp(&self, block_number: u64) -> LedgerResult<u64>;

    /// Authoritative evidence data from the contract; `None` if it does not exist.
    async fn get_evidence(
        &self,
        contract: Address,
        evidence_id: &str,
    ) -> LedgerResult<Option<CanonicalEvidence>>;
}
