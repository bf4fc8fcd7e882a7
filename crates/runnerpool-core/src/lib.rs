//! runnerpool-core — shared building blocks for the runner pool crates.
//!
//! Holds the `runnerpool.toml` configuration model, the live resource-class
//! spec table, and the timestamp/duration helpers every other crate uses to
//! read and write lease thresholds.

pub mod config;
pub mod resource;
pub mod time;

pub use config::{ConfigError, PoolConfig};
pub use resource::{
    is_valid_class_name, pool_queue_name, ResourceClassSpec, ResourceClassTable,
};
pub use time::{add_duration, format_timestamp, parse_duration, parse_timestamp, sub_duration};
