//! Selection error types.

use thiserror::Error;

use runnerpool_instance::InstanceError;
use runnerpool_pool::PoolError;
use runnerpool_state::{InstanceState, StateError};

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error("record store unavailable: {0}")]
    State(#[from] StateError),

    #[error("instance {id} cannot be released from state {state}")]
    NotReleasable { id: String, state: InstanceState },
}

pub type SelectionResult<T> = Result<T, SelectionError>;
