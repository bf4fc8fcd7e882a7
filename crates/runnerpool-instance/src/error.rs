//! Instance lifecycle error types.

use std::fmt;

use thiserror::Error;

use runnerpool_state::{InstanceState, StateError};

/// Which part of a transition's expectation the stored record violated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictReason {
    Missing,
    StateMismatch {
        expected: InstanceState,
        actual: InstanceState,
    },
    OwnerMismatch {
        expected: String,
        actual: String,
    },
    ThresholdMismatch {
        selects_unexpired: bool,
        threshold: String,
    },
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::Missing => f.write_str("record missing"),
            ConflictReason::StateMismatch { expected, actual } => {
                write!(f, "state is {actual}, expected {expected}")
            }
            ConflictReason::OwnerMismatch { expected, actual } => {
                write!(f, "runId is {actual:?}, expected {expected:?}")
            }
            ConflictReason::ThresholdMismatch {
                selects_unexpired,
                threshold,
            } => {
                let wanted = if *selects_unexpired { "unexpired" } else { "expired" };
                write!(f, "threshold {threshold:?} is not {wanted}")
            }
        }
    }
}

/// Errors from instance lifecycle operations.
#[derive(Debug, Error)]
pub enum InstanceError {
    #[error("transition conflict on {id}: {}", join(.reasons))]
    TransitionConflict {
        id: String,
        reasons: Vec<ConflictReason>,
    },

    #[error("delete of {id} rejected: record is not owned by {run_id}")]
    IsolationConflict { id: String, run_id: String },

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("record store unavailable: {0}")]
    Upstream(#[from] StateError),
}

impl InstanceError {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            InstanceError::TransitionConflict { .. } | InstanceError::IsolationConflict { .. }
        )
    }
}

fn join(reasons: &[ConflictReason]) -> String {
    if reasons.is_empty() {
        return "condition not met".to_string();
    }
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type InstanceResult<T> = Result<T, InstanceError>;
