//! `EvidenceStorage` view bindings.

use alloy::primitives::{Address, B256};
use alloy::sol;
use evidence_core::DEFAULT_HASH_ALGORITHM;

use super::events::u256_to_u64;

sol! {
    /// Read side of the evidence contract.
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract EvidenceStorage {
        struct FileMetadata {
            string fileName;
            string mimeType;
            uint256 size;
            uint256 creationTime;
        }

        struct HashInfo {
            string algorithm;
            bytes32 value;
        }

        struct Evidence {
            string evidenceId;
            address userId;
            FileMetadata metadata;
            HashInfo hash;
            uint256 timestamp;
            uint256 blockHeight;
            string status;
            string memo;
            bool exists;
        }

        function getEvidence(string evidenceId) external view returns (Evidence memory);
    }
}

/// Evidence as the contract reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvidence {
    /// Ledger-assigned identifier
    pub evidence_id: String,
    /// Owning account
    pub owner: Address,
    /// Original file name
    pub file_name: String,
    /// MIME type of the file
    pub mime_type: String,
    /// File size in bytes
    pub size: u64,
    /// File creation time (unix seconds)
    pub creation_time: u64,
    /// Digest algorithm, e.g. "SHA256"
    pub hash_algorithm: String,
    /// Digest value
    pub hash_value: B256,
    /// Submission time recorded by the contract
    pub timestamp: u64,
    /// Block the contract recorded the evidence in
    pub block_height: u64,
    /// Free-form note
    pub memo: String,
}

impl CanonicalEvidence {
    /// Convert the ABI struct. Returns `None` when the contract flags the
    /// slot as nonexistent.
    pub fn from_abi(evidence: EvidenceStorage::Evidence) -> Option<Self> {
        if !evidence.exists {
            return None;
        }

        let hash_algorithm = if evidence.hash.algorithm.is_empty() {
            DEFAULT_HASH_ALGORITHM.to_string()
        } else {
            evidence.hash.algorithm
        };

        Some(Self {
            evidence_id: evidence.evidenceId,
            owner: evidence.userId,
            file_name: evidence.metadata.fileName,
            mime_type: evidence.metadata.mimeType,
            size: u256_to_u64(evidence.metadata.size),
            creation_time: u256_to_u64(evidence.metadata.creationTime),
            hash_algorithm,
            hash_value: evidence.hash.value,
            timestamp: u256_to_u64(evidence.timestamp),
            block_height: u256_to_u64(evidence.blockHeight),
            memo: evidence.memo,
        })
    }
}
