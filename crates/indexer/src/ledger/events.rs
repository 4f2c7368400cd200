//! Evidence contract events and their stored payload encoding.
//!
//! Every event is reduced to one payload shape per kind. The stored form is
//! a JSON envelope carrying a version number:
//!
//! ```json
//! {"v":1,"payload":{"event":"EvidenceRevoked","evidence_id":"EVID-1","revoker":"0x..","timestamp":1700000000}}
//! ```

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use evidence_core::{EventKind, EVENT_PAYLOAD_VERSION};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::LedgerError;

sol! {
    /// Emitted when new evidence is stored.
    #[derive(Debug, PartialEq, Eq)]
    event EvidenceSubmitted(
        string evidenceId,
        address indexed user,
        bytes32 indexed hashValue,
        uint256 timestamp
    );

    /// Emitted when an evidence status changes.
    #[derive(Debug, PartialEq, Eq)]
    event EvidenceStatusChanged(
        string evidenceId,
        string oldStatus,
        string newStatus,
        address indexed user
    );

    /// Emitted when evidence is revoked.
    #[derive(Debug, PartialEq, Eq)]
    event EvidenceRevoked(
        string evidenceId,
        address indexed revoker,
        uint256 timestamp
    );
}

/// Topic0 hash for an event kind.
pub fn signature_hash(kind: EventKind) -> B256 {
    match kind {
        EventKind::EvidenceSubmitted => EvidenceSubmitted::SIGNATURE_HASH,
        EventKind::EvidenceStatusChanged => EvidenceStatusChanged::SIGNATURE_HASH,
        EventKind::EvidenceRevoked => EvidenceRevoked::SIGNATURE_HASH,
    }
}

/// `EvidenceSubmitted` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedPayload {
    /// Ledger-assigned evidence identifier
    pub evidence_id: String,
    /// Submitting account
    pub user: Address,
    /// Content digest
    pub hash_value: B256,
    /// Contract-side submission time (unix seconds)
    pub timestamp: u64,
}

/// `EvidenceStatusChanged` payload. Statuses are kept verbatim and
/// validated by the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangedPayload {
    /// Evidence identifier
    pub evidence_id: String,
    /// Status before the change
    pub old_status: String,
    /// Status after the change
    pub new_status: String,
    /// Account that made the change, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Address>,
}

/// `EvidenceRevoked` payload. The revoker is kept as text and validated by
/// the processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokedPayload {
    /// Evidence identifier
    pub evidence_id: String,
    /// Revoking account, `0x`-prefixed hex
    pub revoker: String,
    /// Contract-side revocation time (unix seconds)
    pub timestamp: u64,
}

/// Decoded event body, one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EventPayload {
    /// See [`SubmittedPayload`]
    EvidenceSubmitted(SubmittedPayload),
    /// See [`StatusChangedPayload`]
    EvidenceStatusChanged(StatusChangedPayload),
    /// See [`RevokedPayload`]
    EvidenceRevoked(RevokedPayload),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    v: u32,
    payload: EventPayload,
}

/// A stored payload could not be turned back into an [`EventPayload`].
#[derive(Error, Debug)]
pub enum PayloadError {
    /// Not valid JSON for any payload shape.
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Written by a newer encoder.
    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u32),
}

impl EventPayload {
    /// Kind of event carried.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::EvidenceSubmitted(_) => EventKind::EvidenceSubmitted,
            EventPayload::EvidenceStatusChanged(_) => EventKind::EvidenceStatusChanged,
            EventPayload::EvidenceRevoked(_) => EventKind::EvidenceRevoked,
        }
    }

    /// Evidence the event refers to.
    pub fn evidence_id(&self) -> &str {
        match self {
            EventPayload::EvidenceSubmitted(p) => &p.evidence_id,
            EventPayload::EvidenceStatusChanged(p) => &p.evidence_id,
            EventPayload::EvidenceRevoked(p) => &p.evidence_id,
        }
    }

    /// Serialize into the versioned storage form.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&Envelope {
            v: EVENT_PAYLOAD_VERSION,
            payload: self.clone(),
        })
    }

    /// Parse the versioned storage form.
    pub fn decode(raw: &str) -> Result<Self, PayloadError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        if envelope.v != EVENT_PAYLOAD_VERSION {
            return Err(PayloadError::UnsupportedVersion(envelope.v));
        }
        Ok(envelope.payload)
    }
}

/// A decoded contract event with its position on the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEvent {
    /// Emitting contract
    pub contract_address: Address,
    /// Block containing the transaction
    pub block_number: u64,
    /// Transaction hash
    pub tx_hash: B256,
    /// Log index within the block
    pub log_index: u64,
    /// Decoded body
    pub payload: EventPayload,
}

impl LedgerEvent {
    /// Kind of event carried.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Sort key giving chain order.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }

    /// Decode an RPC log. Returns `Ok(None)` for logs that are not one of
    /// the three evidence events.
    pub fn from_log(log: &Log) -> Result<Option<Self>, LedgerError> {
        let Some(topic0) = log.topics().first().copied() else {
            return Ok(None);
        };

        let payload = if topic0 == EvidenceSubmitted::SIGNATURE_HASH {
            let event = EvidenceSubmitted::decode_log(log.as_ref(), true)
                .map_err(|e| LedgerError::Decode(format!("EvidenceSubmitted: {e}")))?;
            EventPayload::EvidenceSubmitted(SubmittedPayload {
                evidence_id: event.evidenceId.clone(),
                user: event.user,
                hash_value: event.hashValue,
                timestamp: u256_to_u64(event.timestamp),
            })
        } else if topic0 == EvidenceStatusChanged::SIGNATURE_HASH {
            let event = EvidenceStatusChanged::decode_log(log.as_ref(), true)
                .map_err(|e| LedgerError::Decode(format!("EvidenceStatusChanged: {e}")))?;
            EventPayload::EvidenceStatusChanged(StatusChangedPayload {
                evidence_id: event.evidenceId.clone(),
                old_status: event.oldStatus.clone(),
                new_status: event.newStatus.clone(),
                user: (!event.user.is_zero()).then_some(event.user),
            })
        } else if topic0 == EvidenceRevoked::SIGNATURE_HASH {
            let event = EvidenceRevoked::decode_log(log.as_ref(), true)
                .map_err(|e| LedgerError::Decode(format!("EvidenceRevoked: {e}")))?;
            EventPayload::EvidenceRevoked(RevokedPayload {
                evidence_id: event.evidenceId.clone(),
                revoker: event.revoker.to_string(),
                timestamp: u256_to_u64(event.timestamp),
            })
        } else {
            return Ok(None);
        };

        let block_number = log
            .block_number
            .ok_or_else(|| LedgerError::Decode("log missing block_number".to_string()))?;
        let tx_hash = log
            .transaction_hash
            .ok_or_else(|| LedgerError::Decode("log missing transaction_hash".to_string()))?;
        let log_index = log
            .log_index
            .ok_or_else(|| LedgerError::Decode("log missing log_index".to_string()))?;

        Ok(Some(Self {
            contract_address: log.address(),
            block_number,
            tx_hash,
            log_index,
            payload,
        }))
    }
}

/// Clamp an on-chain uint256 into u64.
pub(crate) fn u256_to_u64(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}
