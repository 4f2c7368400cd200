//! Error types for ingestion and event processing.

use evidence_core::EventKind;
use thiserror::Error;

/// Failure of the ingestion machinery: store, ledger or retry exhaustion.
#[derive(Error, Debug)]
pub enum IngestionError {
    /// An operation kept failing until the retry budget ran out.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Name given to the operation by the caller
        operation: String,
        /// Attempts made
        attempts: u32,
        /// Last error observed
        #[source]
        source: anyhow::Error,
    },

    /// The relational store rejected or could not serve a request.
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),

    /// A row expected to exist was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of row
        entity: &'static str,
        /// Identifier used for the lookup
        id: String,
    },

    /// The ledger RPC endpoint failed.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The shutdown signal interrupted a wait.
    #[error("operation cancelled by shutdown")]
    Cancelled,
}

impl IngestionError {
    /// Wrap a storage failure.
    pub fn store(err: impl Into<anyhow::Error>) -> Self {
        IngestionError::Store(err.into())
    }
}

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;

/// Failure raised by the ledger client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Transport or node failure; worth retrying.
    #[error("RPC request failed: {0}")]
    Rpc(String),

    /// The transaction receipt does not exist (yet).
    #[error("receipt not found for transaction {0}")]
    ReceiptNotFound(String),

    /// The block does not exist (yet).
    #[error("block {0} not found")]
    BlockNotFound(u64),

    /// A log could not be decoded into a known event.
    #[error("failed to decode log: {0}")]
    Decode(String),

    /// The contract reports no evidence with this identifier.
    #[error("evidence {0} does not exist on the ledger")]
    EvidenceNotFound(String),

    /// The live subscription stream ended with an error.
    #[error("subscription failed: {0}")]
    Subscription(String),
}

/// Failure of a single type processor.
///
/// `retryable` only steers how loudly the failure is logged: the event
/// stays unprocessed either way and the sweep picks it up again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} processing failed for evidence '{evidence_id}': {message}")]
pub struct EventProcessingError {
    /// Event type that failed
    pub kind: EventKind,
    /// Evidence identifier, empty if it could not be decoded
    pub evidence_id: String,
    /// Whether a later attempt can succeed without operator action
    pub retryable: bool,
    /// Human-readable cause
    pub message: String,
}

impl EventProcessingError {
    /// Failure that a later attempt may resolve.
    pub fn retryable(kind: EventKind, evidence_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            evidence_id: evidence_id.to_string(),
            retryable: true,
            message: message.into(),
        }
    }

    /// Failure that will repeat until the data changes.
    pub fn permanent(kind: EventKind, evidence_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            evidence_id: evidence_id.to_string(),
            retryable: false,
            message: message.into(),
        }
    }
}

/// Outcome of dispatching one stored event.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The processor rejected the event.
    #[error(transparent)]
    Processing(#[from] EventProcessingError),

    /// Bookkeeping on the event row failed.
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
}
