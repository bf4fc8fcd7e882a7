//! Error types for the runner pool state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
///
/// Everything except [`StateError::ConditionFailed`] means the store itself
/// could not serve the request.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("invalid queue name: {0:?}")]
    InvalidQueue(String),

    #[error("conditional check failed for {key}")]
    ConditionFailed { key: String },
}

impl StateError {
    /// Whether this is a failed write condition rather than a store fault.
    pub fn is_condition_failed(&self) -> bool {
        matches!(self, StateError::ConditionFailed { .. })
    }
}
