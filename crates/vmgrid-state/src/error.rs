//! Error types for the VMGrid state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open reservation store: {0}")]
    Open(String),

    #[error("reservation store transaction failed: {0}")]
    Transaction(String),

    #[error("reservation store table unavailable: {0}")]
    Table(String),

    #[error("failed to read stored record: {0}")]
    Read(String),

    #[error("failed to write stored record: {0}")]
    Write(String),

    #[error("failed to encode stored record: {0}")]
    Serialize(String),

    #[error("failed to decode stored record: {0}")]
    Deserialize(String),
}
