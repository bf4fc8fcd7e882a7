//! Pool pickup error types.

use thiserror::Error;

use runnerpool_state::StateError;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("unknown resource class: {0}")]
    InvalidResourceClass(String),

    #[error("invalid instance type pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("pool queue unavailable: {0}")]
    Upstream(#[from] StateError),
}

pub type PoolResult<T> = Result<T, PoolError>;
