//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Status string is not one of the known evidence statuses.
    #[error("Invalid evidence status: '{0}'")]
    InvalidStatus(String),

    /// Event name is not emitted by the evidence contract.
    #[error("Unknown event kind: '{0}'")]
    UnknownEventKind(String),

    /// Checkpoint status string is not recognised.
    #[error("Invalid checkpoint status: '{0}'")]
    InvalidCheckpointStatus(String),

    /// Address is not `0x` followed by 40 hex characters.
    #[error("Invalid address format: '{0}'")]
    InvalidAddress(String),

    /// Address is well formed but zero.
    #[error("Zero address is not allowed")]
    ZeroAddress,

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
