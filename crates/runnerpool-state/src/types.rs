//! Domain types persisted by the runner pool.
//!
//! Field names are camelCase on the wire: heartbeat and signal records are
//! written by scripts running on the workers themselves, and those scripts
//! use the same literals.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::record::Record;

/// Attribute names usable in conditions and assignments.
pub mod attr {
    pub const ID: &str = "id";
    pub const STATE: &str = "state";
    pub const RUN_ID: &str = "runId";
    pub const THRESHOLD: &str = "threshold";
    pub const UPDATED_AT: &str = "updatedAt";
}

// ── Instance ──────────────────────────────────────────────────────

/// Lifecycle position of a pooled worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Created,
    Idle,
    Claimed,
    Running,
    Terminated,
}

impl InstanceState {
    pub const ALL: [InstanceState; 5] = [
        InstanceState::Created,
        InstanceState::Idle,
        InstanceState::Claimed,
        InstanceState::Running,
        InstanceState::Terminated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Created => "created",
            InstanceState::Idle => "idle",
            InstanceState::Claimed => "claimed",
            InstanceState::Running => "running",
            InstanceState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstanceState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown instance state: {s}"))
    }
}

/// One record per pooled worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    pub id: String,
    pub state: InstanceState,
    /// Empty means unowned.
    pub run_id: String,
    /// ISO-8601 UTC, second precision. Lease expiry while claimed, hard
    /// deadline while running. Empty means the record is never swept.
    pub threshold: String,
    pub resource_class: String,
    pub instance_type: String,
    #[serde(default)]
    pub cpu: u32,
    #[serde(default)]
    pub mmem: u64,
    #[serde(default)]
    pub usage_class: String,
}

impl Record for InstanceRecord {
    const ENTITY: &'static str = "instance";

    fn identifier(&self) -> &str {
        &self.id
    }
}

impl InstanceRecord {
    /// The descriptor placed on the idle pool queue for this instance.
    pub fn pool_message(&self) -> PoolMessage {
        PoolMessage {
            id: self.id.clone(),
            resource_class: self.resource_class.clone(),
            instance_type: self.instance_type.clone(),
            cpu: self.cpu,
            mmem: self.mmem,
            usage_class: self.usage_class.clone(),
            threshold: self.threshold.clone(),
        }
    }
}

// ── Health / signal ───────────────────────────────────────────────

/// Latest heartbeat written by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub id: String,
    pub updated_at: String,
}

impl Record for HealthRecord {
    const ENTITY: &'static str = "heartbeat";

    fn identifier(&self) -> &str {
        &self.id
    }
}

/// Latest milestone reported by a worker, tagged with the run it believes
/// it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRecord {
    pub id: String,
    pub state: String,
    pub run_id: String,
}

impl Record for SignalRecord {
    const ENTITY: &'static str = "signal";

    fn identifier(&self) -> &str {
        &self.id
    }
}

// ── Pool message ──────────────────────────────────────────────────

/// The queue's copy of an idle instance's descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMessage {
    pub id: String,
    pub resource_class: String,
    pub instance_type: String,
    pub cpu: u32,
    pub mmem: u64,
    pub usage_class: String,
    pub threshold: String,
}
