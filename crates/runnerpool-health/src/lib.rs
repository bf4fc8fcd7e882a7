//! runnerpool-health — observing worker-reported state.
//!
//! Workers write two kinds of records on their own schedule: heartbeats
//! (`updatedAt`) and milestone signals (`state`, `runId`). Both monitors
//! here split the job the same way:
//!
//! ```text
//! poll_*()
//!   └── Waiter (immediate check, then every interval, until deadline)
//!       └── check: concurrent per-id reads (settle all)
//!           └── classify_*(): pure, record vs. now / expected run
//! ```
//!
//! Polls never raise for "not yet" or "never": they return a
//! [`PollOutcome`] with a boolean and a diagnostic message. Only malformed
//! input (an unknown signal name) is an error.

pub mod error;
pub mod health;
pub mod signal;
pub mod waiter;

mod settle;

pub use error::SignalError;
pub use health::{HealthMonitor, HealthStatus};
pub use signal::{SignalMonitor, SignalPoll, SignalStatus, WorkerSignal};
pub use waiter::{Check, PollOutcome, WaitOutcome, Waiter};
