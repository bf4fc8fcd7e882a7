//! Monitor error types.

use thiserror::Error;

use runnerpool_state::StateError;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("invalid signal: {0:?}")]
    InvalidSignal(String),

    #[error("record store unavailable: {0}")]
    Upstream(#[from] StateError),
}
