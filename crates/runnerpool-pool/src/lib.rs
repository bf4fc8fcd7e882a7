//! runnerpool-pool — picking usable instances off a resource-class pool.
//!
//! A pool is a FIFO queue of idle-instance descriptors. The queue cannot be
//! peeked, so the [`PoolPickupManager`] receives messages one at a time and
//! classifies each against the request:
//!
//! - **delete**: the descriptor can never be handed out (unknown class,
//!   wrong size, lease already passed) and is dropped.
//! - **requeue**: usable by someone else (instance type or usage class
//!   differ) and goes back to the end of the queue.
//! - **ok**: returned to the caller.
//!
//! A per-id frequency counter detects a pool whose remaining messages are
//! all unusable for this request. Once any id has been seen more than the
//! tolerance, the pool is treated as empty.

pub mod error;
pub mod matcher;
pub mod pickup;

pub use error::{PoolError, PoolResult};
pub use matcher::TypeMatcher;
pub use pickup::{Classification, PoolPickupManager};
