//! runnerpool-selection — handing pooled instances to job runs and taking
//! them back.
//!
//! ```text
//! select_batch(n)
//!   └── n × ClaimWorker (concurrent, sharing one PoolPickupManager)
//!       loop:
//!         pickup ── None ──▶ slot stays empty
//!           │
//!         claim (idle/"" → claimed/run) ── conflict ──▶ loop
//!           │
//!         health ── not healthy ──▶ loop (claim left to lapse)
//!           │
//!         payload
//! ```
//!
//! A batch never fails for under-fulfilment; `num_required` reports the
//! shortfall. A store or queue failure in any slot fails the whole batch. [`release_instance`] returns an instance to its pool and
//! [`sweep_expired`] terminates whatever outlived its threshold.

pub mod batch;
pub mod claim;
pub mod error;
pub mod release;
pub mod sweep;

pub use batch::{select_batch, select_instances, BatchRequest, BatchSelection};
pub use claim::{ClaimOutcome, ClaimWorker};
pub use error::{SelectionError, SelectionResult};
pub use release::release_instance;
pub use sweep::{sweep_expired, SweepReport};
