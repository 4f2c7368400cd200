//! Core types for the evidence indexer.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Lifecycle status of an evidence record.
///
/// Stored and emitted on-chain as lowercase strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceStatus {
    /// Evidence is valid and in force.
    Effective,
    /// Evidence was revoked by its owner or an authorised revoker.
    Revoked,
    /// Evidence is awaiting review.
    Pending,
    /// Evidence was rejected during review.
    Rejected,
    /// Evidence validity period has ended.
    Expired,
}

impl EvidenceStatus {
    /// Every status the contract may emit.
    pub const ALL: [EvidenceStatus; 5] = [
        EvidenceStatus::Effective,
        EvidenceStatus::Revoked,
        EvidenceStatus::Pending,
        EvidenceStatus::Rejected,
        EvidenceStatus::Expired,
    ];

    /// Canonical string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EvidenceStatus::Effective => "effective",
            EvidenceStatus::Revoked => "revoked",
            EvidenceStatus::Pending => "pending",
            EvidenceStatus::Rejected => "rejected",
            EvidenceStatus::Expired => "expired",
        }
    }

    /// Whether no further transition is expected out of this status.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            EvidenceStatus::Revoked | EvidenceStatus::Rejected | EvidenceStatus::Expired
        )
    }
}

impl fmt::Display for EvidenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvidenceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        EvidenceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| CoreError::InvalidStatus(s.to_string()))
    }
}

/// Contract events the indexer ingests.
///
/// The set is closed: each kind has exactly one processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// `EvidenceSubmitted(string evidenceId, address user, bytes32 hashValue, uint256 timestamp)`
    EvidenceSubmitted,
    /// `EvidenceStatusChanged(string evidenceId, string oldStatus, string newStatus, address user)`
    EvidenceStatusChanged,
    /// `EvidenceRevoked(string evidenceId, address revoker, uint256 timestamp)`
    EvidenceRevoked,
}

impl EventKind {
    /// All kinds in dispatch priority order.
    pub const ALL: [EventKind; 3] = [
        EventKind::EvidenceSubmitted,
        EventKind::EvidenceStatusChanged,
        EventKind::EvidenceRevoked,
    ];

    /// Event name as it appears in the contract ABI and the database.
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::EvidenceSubmitted => "EvidenceSubmitted",
            EventKind::EvidenceStatusChanged => "EvidenceStatusChanged",
            EventKind::EvidenceRevoked => "EvidenceRevoked",
        }
    }

    /// Dispatch priority; lower runs first.
    pub const fn priority(&self) -> u8 {
        match self {
            EventKind::EvidenceSubmitted => 1,
            EventKind::EvidenceStatusChanged => 2,
            EventKind::EvidenceRevoked => 3,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CoreError::UnknownEventKind(s.to_string()))
    }
}

/// State of a per-contract sync checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckpointStatus {
    /// Last batch or event committed normally.
    Synced,
    /// Checkpoint was rewound manually.
    Reset,
    /// Last startup or sync attempt failed.
    Error,
}

impl CheckpointStatus {
    /// Canonical string form.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Synced => "SYNCED",
            CheckpointStatus::Reset => "RESET",
            CheckpointStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYNCED" => Ok(CheckpointStatus::Synced),
            "RESET" => Ok(CheckpointStatus::Reset),
            "ERROR" => Ok(CheckpointStatus::Error),
            other => Err(CoreError::InvalidCheckpointStatus(other.to_string())),
        }
    }
}

/// Parse a `0x`-prefixed, 40-hex-digit address and reject the zero address.
pub fn parse_address(s: &str) -> Result<Address, CoreError> {
    let hex_part = s
        .strip_prefix("0x")
        .ok_or_else(|| CoreError::InvalidAddress(s.to_string()))?;

    if hex_part.len() != 40 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CoreError::InvalidAddress(s.to_string()));
    }

    let address = Address::from_str(s).map_err(|_| CoreError::InvalidAddress(s.to_string()))?;
    if address.is_zero() {
        return Err(CoreError::ZeroAddress);
    }

    Ok(address)
}
