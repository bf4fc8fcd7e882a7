//! redb table definitions for the runner pool state store.
//!
//! Both tables use `&str` keys and `&[u8]` values (JSON-serialized).

use redb::TableDefinition;

/// Records keyed by `{entity_type}#{identifier}`.
pub const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Pool queue messages keyed by `{queue}/{sequence:020}`.
pub const QUEUES: TableDefinition<&str, &[u8]> = TableDefinition::new("queues");
