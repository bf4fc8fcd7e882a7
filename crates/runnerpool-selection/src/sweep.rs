//! Expiry sweep: terminate and remove records that outlived their threshold.

use std::collections::BTreeMap;

use tracing::{info, warn};

use runnerpool_core::parse_timestamp;
use runnerpool_instance::{InstanceEngine, Transition};
use runnerpool_state::InstanceState;

use crate::error::SelectionResult;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Moved to `terminated`; the provisioner should tear these down.
    pub terminated: Vec<String>,
    /// Changed between the query and the transition; left alone.
    pub skipped: Vec<String>,
    /// Terminated records whose delete went through.
    pub deleted: Vec<String>,
}

/// Terminate every record in `states` whose threshold has passed, then
/// delete the terminated records, each guarded by the owner it had.
///
/// A record that moves on between query and transition is skipped, not
/// retried.
pub fn sweep_expired(
    engine: &InstanceEngine,
    states: &[InstanceState],
) -> SelectionResult<SweepReport> {
    let mut report = SweepReport::default();
    let mut by_owner: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for record in engine.query_expired_by_states(states)? {
        let result = engine.transition(&Transition {
            id: &record.id,
            expected_run_id: &record.run_id,
            new_run_id: &record.run_id,
            expected_state: record.state,
            new_state: InstanceState::Terminated,
            new_threshold: parse_timestamp(&record.threshold),
            selects_unexpired: false,
        });
        match result {
            Ok(_) => {
                report.terminated.push(record.id.clone());
                by_owner.entry(record.run_id).or_default().push(record.id);
            }
            Err(e) if e.is_conflict() => report.skipped.push(record.id),
            Err(e) => return Err(e.into()),
        }
    }

    for (run_id, ids) in &by_owner {
        for outcome in engine.bulk_delete_with_isolation(ids, Some(run_id.as_str())) {
            match outcome.result {
                Ok(()) => report.deleted.push(outcome.id),
                Err(e) => warn!(id = %outcome.id, error = %e, "terminated record not deleted"),
            }
        }
    }

    info!(
        terminated = report.terminated.len(),
        skipped = report.skipped.len(),
        deleted = report.deleted.len(),
        "expiry sweep finished"
    );
    Ok(report)
}
