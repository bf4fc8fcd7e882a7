//! Health monitor: heartbeat staleness classification.
//!
//! Workers overwrite their heartbeat record every `period`. A record older
//! than `period * multiplier` means the worker stopped reporting.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use runnerpool_core::{format_timestamp, parse_timestamp};
use runnerpool_state::{HealthRecord, RecordTable, StateResult, StateStore};

use crate::settle::settle_all;
use crate::waiter::{Check, PollOutcome, Waiter};

pub const DEFAULT_MULTIPLIER: u32 = 3;

/// Classification of one worker's heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    /// No heartbeat record at all.
    Missing,
}

#[derive(Clone)]
pub struct HealthMonitor {
    records: RecordTable<HealthRecord>,
    period: Duration,
    multiplier: u32,
}

impl HealthMonitor {
    pub fn new(store: StateStore, period: Duration) -> Self {
        Self {
            records: RecordTable::new(store),
            period,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Maximum heartbeat age still counted as healthy. Saturates at
    /// `Duration::MAX`.
    pub fn window(&self) -> Duration {
        self.period
            .checked_mul(self.multiplier)
            .unwrap_or(Duration::MAX)
    }

    /// Classify a heartbeat record against `now`. Heartbeats stamped in the
    /// future (clock skew) count as fresh; unparseable ones as unhealthy.
    pub fn classify_record(&self, record: Option<&HealthRecord>, now: DateTime<Utc>) -> HealthStatus {
        let Some(record) = record else {
            return HealthStatus::Missing;
        };
        let Some(updated_at) = parse_timestamp(&record.updated_at) else {
            return HealthStatus::Unhealthy;
        };
        match (now - updated_at).to_std() {
            Ok(age) if age > self.window() => HealthStatus::Unhealthy,
            _ => HealthStatus::Healthy,
        }
    }

    /// Read and classify one id.
    pub fn classify(&self, id: &str) -> StateResult<HealthStatus> {
        let record = self.records.get(id)?;
        let status = self.classify_record(record.as_ref(), Utc::now());
        debug!(%id, ?status, "health classified");
        Ok(status)
    }

    /// Classify every id concurrently. A failed read counts as unhealthy.
    pub async fn classify_all(&self, ids: &[String]) -> Vec<(String, HealthStatus)> {
        let records = self.records.clone();
        let reads = settle_all(ids, move |id| records.get(id)).await;
        let now = Utc::now();
        ids.iter()
            .cloned()
            .zip(reads)
            .map(|(id, read)| {
                let status = match read {
                    Ok(record) => self.classify_record(record.as_ref(), now),
                    Err(_) => HealthStatus::Unhealthy,
                };
                (id, status)
            })
            .collect()
    }

    async fn check_all(&self, ids: &[String]) -> Check {
        let statuses = self.classify_all(ids).await;
        let pending = |wanted: HealthStatus| -> Vec<String> {
            statuses
                .iter()
                .filter(|(_, s)| *s == wanted)
                .map(|(id, _)| id.clone())
                .collect()
        };
        let unhealthy = pending(HealthStatus::Unhealthy);
        let missing = pending(HealthStatus::Missing);
        if unhealthy.is_empty() && missing.is_empty() {
            return Check::Success;
        }
        Check::Retry(format!("unhealthy: {unhealthy:?}, missing: {missing:?}"))
    }

    /// Wait until every id classifies healthy.
    pub async fn poll_all_healthy(
        &self,
        ids: &[String],
        timeout: Duration,
        interval: Duration,
    ) -> PollOutcome {
        let waiter = Waiter::new(timeout, interval);
        let outcome = waiter.wait(|| self.check_all(ids)).await;
        let result = PollOutcome::from_wait(&outcome, "all instances healthy", timeout);
        info!(count = ids.len(), state = result.state, message = %result.message, "health poll finished");
        result
    }

    /// Write a heartbeat for `id` stamped now, as a worker would.
    pub fn record_heartbeat(&self, id: &str) -> StateResult<()> {
        self.record_heartbeat_at(id, Utc::now())
    }

    pub fn record_heartbeat_at(&self, id: &str, at: DateTime<Utc>) -> StateResult<()> {
        self.records.put(
            &HealthRecord {
                id: id.to_string(),
                updated_at: format_timestamp(at),
            },
            None,
        )
    }
}
