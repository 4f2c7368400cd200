//! Shared constants for the evidence indexer.

/// Contract name used to locate the deployment artifact.
pub const EVIDENCE_CONTRACT_NAME: &str = "EvidenceStorage";

/// Zero address in its canonical string form.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Blocks behind the chain head above which a historical catch-up runs
/// before live subscriptions are opened.
pub const DEFAULT_HISTORICAL_SYNC_THRESHOLD: u64 = 10;

/// Number of blocks per historical sync batch.
pub const DEFAULT_BATCH_SIZE: u64 = 100;

/// Current version of the stored event payload encoding.
///
/// Bump when a field is added or renamed in any payload shape; decoders
/// reject versions they do not know.
pub const EVENT_PAYLOAD_VERSION: u32 = 1;

/// Hash algorithm recorded when the contract leaves it empty.
pub const DEFAULT_HASH_ALGORITHM: &str = "SHA256";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_address_shape() {
        assert_eq!(ZERO_ADDRESS.len(), 42);
        assert!(ZERO_ADDRESS[2..].chars().all(|c| c == '0'));
    }
}
