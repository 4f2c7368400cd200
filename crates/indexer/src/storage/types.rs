//! Database types for the indexer storage layer.
//!
//! Addresses and hashes are stored as lowercase `0x`-prefixed hex text,
//! timestamps as unix seconds.

use alloy::primitives::{Address, B256};
use anyhow::{Context, Result};
use evidence_core::{CheckpointStatus, EventKind, EvidenceStatus};
use std::str::FromStr;

/// A raw event ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRawEvent {
    /// Emitting contract
    pub contract_address: Address,
    /// Event kind
    pub kind: EventKind,
    /// Block number
    pub block_number: u64,
    /// Transaction hash
    pub tx_hash: B256,
    /// Log index within the block
    pub log_index: u64,
    /// Block timestamp (unix seconds)
    pub block_timestamp: u64,
    /// Versioned JSON payload, see [`crate::ledger::EventPayload::encode`]
    pub payload: String,
}

/// A stored raw event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Row id
    pub id: i64,
    /// Emitting contract
    pub contract_address: Address,
    /// Event name as stored. Kept as text so rows written by other
    /// versions still load.
    pub event_type: String,
    /// Block number
    pub block_number: u64,
    /// Transaction hash
    pub tx_hash: B256,
    /// Log index within the block
    pub log_index: u64,
    /// Block timestamp (unix seconds)
    pub block_timestamp: u64,
    /// Versioned JSON payload
    pub payload: String,
    /// Whether a processor handled the event
    pub processed: bool,
    /// Failed processing attempts since the last success
    pub failure_count: u32,
    /// Insert time
    pub created_at: i64,
    /// Time the event was marked processed
    pub processed_at: Option<i64>,
}

impl RawEvent {
    /// Parsed event kind; `None` for names this build does not know.
    pub fn kind(&self) -> Option<EventKind> {
        self.event_type.parse().ok()
    }
}

/// Outcome of an idempotent raw event insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedEvent {
    /// The stored row (new or pre-existing)
    pub event: RawEvent,
    /// `false` if the dedup key was already present
    pub inserted: bool,
}

/// Per-contract sync checkpoint row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Contract the checkpoint belongs to
    pub contract_address: Address,
    /// Last block known to be fully scanned
    pub last_block_number: u64,
    /// Checkpoint state
    pub status: CheckpointStatus,
    /// Last update time
    pub last_sync_at: i64,
    /// Last recorded failure
    pub error_message: Option<String>,
    /// Consecutive failures recorded
    pub retry_count: u32,
}

/// Evidence row to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvidence {
    /// Ledger-assigned identifier
    pub evidence_id: String,
    /// Owning account
    pub owner: Address,
    /// Original file name
    pub file_name: String,
    /// MIME type
    pub mime_type: String,
    /// File size in bytes
    pub file_size: u64,
    /// File creation time
    pub file_created_at: u64,
    /// Digest algorithm
    pub hash_algorithm: String,
    /// Digest value
    pub hash_value: B256,
    /// Initial status
    pub status: EvidenceStatus,
    /// Block of the submitting transaction
    pub block_number: u64,
    /// Submitting transaction
    pub tx_hash: B256,
    /// Timestamp of the submitting block
    pub block_timestamp: u64,
    /// Free-form note
    pub memo: String,
}

/// Evidence row as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceRecord {
    /// Row id
    pub id: i64,
    /// Ledger-assigned identifier
    pub evidence_id: String,
    /// Owning account
    pub owner: Address,
    /// Original file name
    pub file_name: String,
    /// MIME type
    pub mime_type: String,
    /// File size in bytes
    pub file_size: u64,
    /// File creation time
    pub file_created_at: u64,
    /// Digest algorithm
    pub hash_algorithm: String,
    /// Digest value
    pub hash_value: B256,
    /// Current status
    pub status: EvidenceStatus,
    /// Block of the submitting transaction
    pub block_number: u64,
    /// Submitting transaction
    pub tx_hash: B256,
    /// Timestamp of the submitting block
    pub block_timestamp: u64,
    /// Free-form note
    pub memo: String,
    /// Revocation time
    pub revoked_at: Option<i64>,
    /// Revoking account
    pub revoker: Option<Address>,
    /// Insert time
    pub created_at: i64,
    /// Last update time
    pub updated_at: i64,
}

/// Status change applied to an evidence row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// New status
    pub status: EvidenceStatus,
    /// Revocation stamp `(time, revoker)`; `None` leaves the columns untouched
    pub revocation: Option<(i64, Option<Address>)>,
}

pub(crate) fn address_to_db(address: &Address) -> String {
    format!("{address:#x}")
}

pub(crate) fn hash_to_db(hash: &B256) -> String {
    format!("{hash:#x}")
}

pub(crate) fn address_from_db(value: &str) -> Result<Address> {
    Address::from_str(value).with_context(|| format!("Invalid stored address: {}", value))
}

pub(crate) fn hash_from_db(value: &str) -> Result<B256> {
    B256::from_str(value).with_context(|| format!("Invalid stored hash: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_db_form_is_lowercase() {
        let address = Address::from_str("0xAbCdEf0123456789aBcDeF0123456789AbCdEf01").unwrap();
        let stored = address_to_db(&address);
        assert_eq!(stored, "0xabcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(address_from_db(&stored).unwrap(), address);
    }

    #[test]
    fn test_raw_event_unknown_kind() {
        let event = RawEvent {
            id: 1,
            contract_address: Address::ZERO,
            event_type: "EvidenceArchived".to_string(),
            block_number: 0,
            tx_hash: B256::ZERO,
            log_index: 0,
            block_timestamp: 0,
            payload: String::new(),
            processed: false,
            failure_count: 0,
            created_at: 0,
            processed_at: None,
        };
        assert_eq!(event.kind(), None);
    }
}
