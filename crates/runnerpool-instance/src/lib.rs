//! runnerpool-instance — the instance lifecycle state machine.
//!
//! Every change of an instance record's `(state, runId, threshold)` triple
//! goes through [`InstanceEngine::transition`]: a single conditional update
//! that requires the expected state, the expected owner, and a threshold on
//! the expected side of "now". No locks are involved; two callers racing for
//! the same record are separated by the store's per-item atomicity, and the
//! loser gets [`InstanceError::TransitionConflict`].
//!
//! ```text
//!            register_idle          claim            activate
//!  created ───────────────▶ idle ──────────▶ claimed ─────────▶ running
//!                            ▲                  │                  │
//!                            └──── release ─────┴──────────────────┘
//!   any state ── expire (threshold forced into the past) ──▶ swept ──▶ terminated
//! ```

pub mod engine;
pub mod error;

pub use engine::{DeleteOutcome, InstanceAttributes, InstanceEngine, Transition, EXPIRE_BACKDATE};
pub use error::{ConflictReason, InstanceError, InstanceResult};
