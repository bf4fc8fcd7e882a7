//! runnerpool-state — record store and pool queues for the runner pool.
//!
//! Backed by [redb](https://docs.rs/redb). Two tables:
//!
//! - `records`: JSON items keyed `{entity_type}#{identifier}`. Every write
//!   may carry a [`Condition`]; the condition is evaluated against the
//!   current item inside the same write transaction, so a conditional
//!   update is an atomic compare-and-swap on that single item.
//! - `queues`: FIFO pool queues keyed `{queue}/{sequence}`. Receiving a
//!   message removes it in the same transaction.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks and processes' worth of callers.

pub mod condition;
pub mod error;
pub mod queue;
pub mod record;
pub mod store;
pub mod tables;
pub mod types;

pub use condition::{Assignment, Condition};
pub use error::{StateError, StateResult};
pub use queue::PoolQueue;
pub use record::{Record, RecordTable};
pub use store::{RecordKey, StateStore};
pub use types::*;
