//! Signal monitor: worker-reported milestones.
//!
//! A worker writes `{id, state, runId}` when it passes a milestone. Each
//! milestone has an OK literal and a FAILED counterpart; the literals are
//! written by scripts on the workers and must not change.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use runnerpool_state::{RecordTable, SignalRecord, StateStore};

use crate::error::SignalError;
use crate::settle::settle_all;
use crate::waiter::{Check, PollOutcome, Waiter};

/// Milestones a worker can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerSignal {
    /// Boot script finished.
    UserData,
    /// Runner registered with the CI service.
    Registration,
    /// Runner deregistered before release.
    Deregistration,
}

impl WorkerSignal {
    pub const ALL: [WorkerSignal; 3] = [
        WorkerSignal::UserData,
        WorkerSignal::Registration,
        WorkerSignal::Deregistration,
    ];

    pub fn ok_value(&self) -> &'static str {
        match self {
            WorkerSignal::UserData => "UD_OK",
            WorkerSignal::Registration => "UD_REG_OK",
            WorkerSignal::Deregistration => "UD_REMOVE_REG_OK",
        }
    }

    pub fn failed_value(&self) -> &'static str {
        match self {
            WorkerSignal::UserData => "UD_FAILED",
            WorkerSignal::Registration => "UD_REG_FAILED",
            WorkerSignal::Deregistration => "UD_REMOVE_REG_FAILED",
        }
    }
}

impl fmt::Display for WorkerSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ok_value())
    }
}

/// Parses a demanded milestone by its OK literal.
impl FromStr for WorkerSignal {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkerSignal::ALL
            .into_iter()
            .find(|signal| signal.ok_value() == s)
            .ok_or_else(|| SignalError::InvalidSignal(s.to_string()))
    }
}

/// Classification of one id against the demanded milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStatus {
    Ok,
    Failed,
    Pending,
}

/// Classify one signal record.
///
/// A record for another run is treated as absent: the id may have been
/// reused and the record left behind by an earlier run.
pub fn classify_signal(
    record: Option<&SignalRecord>,
    run_id: &str,
    signal: WorkerSignal,
) -> SignalStatus {
    match record {
        Some(r) if r.run_id == run_id && r.state == signal.failed_value() => SignalStatus::Failed,
        Some(r) if r.run_id == run_id && r.state == signal.ok_value() => SignalStatus::Ok,
        _ => SignalStatus::Pending,
    }
}

/// Fold per-id classifications: any failure is fatal, success needs all.
pub fn aggregate(statuses: &[(String, SignalStatus)], signal: WorkerSignal) -> Check {
    if let Some((id, _)) = statuses.iter().find(|(_, s)| *s == SignalStatus::Failed) {
        return Check::Failure(format!("{id} reported {}", signal.failed_value()));
    }
    let pending: Vec<&str> = statuses
        .iter()
        .filter(|(_, s)| *s == SignalStatus::Pending)
        .map(|(id, _)| id.as_str())
        .collect();
    if pending.is_empty() {
        Check::Success
    } else {
        Check::Retry(format!("waiting on {signal} from {pending:?}"))
    }
}

/// Input of [`SignalMonitor::poll_on_signal`].
#[derive(Debug, Clone)]
pub struct SignalPoll {
    pub ids: Vec<String>,
    pub run_id: String,
    /// OK literal of the demanded milestone, e.g. `UD_REG_OK`.
    pub signal: String,
    pub timeout: Duration,
    pub interval: Duration,
}

#[derive(Clone)]
pub struct SignalMonitor {
    records: RecordTable<SignalRecord>,
}

impl SignalMonitor {
    pub fn new(store: StateStore) -> Self {
        Self {
            records: RecordTable::new(store),
        }
    }

    /// Classify every id concurrently. A failed read counts as pending.
    pub async fn classify_all(
        &self,
        ids: &[String],
        run_id: &str,
        signal: WorkerSignal,
    ) -> Vec<(String, SignalStatus)> {
        let records = self.records.clone();
        let reads = settle_all(ids, move |id| records.get(id)).await;
        ids.iter()
            .cloned()
            .zip(reads)
            .map(|(id, read)| {
                let status = match read {
                    Ok(record) => classify_signal(record.as_ref(), run_id, signal),
                    Err(_) => SignalStatus::Pending,
                };
                (id, status)
            })
            .collect()
    }

    /// Wait until every id reports the demanded milestone for `run_id`, or
    /// any of them reports its failure.
    ///
    /// Only an unknown signal name is an error.
    pub async fn poll_on_signal(&self, poll: &SignalPoll) -> Result<PollOutcome, SignalError> {
        let signal: WorkerSignal = poll.signal.parse()?;
        let waiter = Waiter::new(poll.timeout, poll.interval);
        let outcome = waiter
            .wait(|| async move {
                let statuses = self.classify_all(&poll.ids, &poll.run_id, signal).await;
                aggregate(&statuses, signal)
            })
            .await;

        let what = format!("{signal} from {} instance(s)", poll.ids.len());
        let result = PollOutcome::from_wait(&outcome, &what, poll.timeout);
        info!(
            run_id = %poll.run_id,
            %signal,
            state = result.state,
            message = %result.message,
            "signal poll finished"
        );
        Ok(result)
    }

    /// Single-id convenience over [`SignalMonitor::poll_on_signal`].
    pub async fn poll_single(
        &self,
        id: &str,
        run_id: &str,
        signal: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<PollOutcome, SignalError> {
        self.poll_on_signal(&SignalPoll {
            ids: vec![id.to_string()],
            run_id: run_id.to_string(),
            signal: signal.to_string(),
            timeout,
            interval,
        })
        .await
    }

    /// Write a signal record, as a worker would.
    pub fn record_signal(&self, id: &str, state: &str, run_id: &str) -> Result<(), SignalError> {
        self.records.put(
            &SignalRecord {
                id: id.to_string(),
                state: state.to_string(),
                run_id: run_id.to_string(),
            },
            None,
        )?;
        Ok(())
    }
}
