//! Compare-and-swap transitions over instance records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use runnerpool_core::{add_duration, format_timestamp, parse_timestamp, sub_duration};
use runnerpool_state::{
    attr, Assignment, Condition, InstanceRecord, InstanceState, RecordTable, StateError,
    StateStore,
};

use crate::error::{ConflictReason, InstanceError, InstanceResult};

/// How far into the past `expire` moves a threshold.
pub const EXPIRE_BACKDATE: Duration = Duration::from_secs(3 * 60);

/// Immutable classification and sizing metadata of a new instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceAttributes {
    pub resource_class: String,
    pub instance_type: String,
    pub cpu: u32,
    pub mmem: u64,
    pub usage_class: String,
    /// Initial threshold. `None` stores an empty threshold, which keeps the
    /// record out of every expiry sweep and out of every transition.
    pub threshold: Option<DateTime<Utc>>,
}

/// Expected and new values of one state-machine step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<'a> {
    pub id: &'a str,
    pub expected_run_id: &'a str,
    pub new_run_id: &'a str,
    pub expected_state: InstanceState,
    pub new_state: InstanceState,
    /// `None` clears the threshold.
    pub new_threshold: Option<DateTime<Utc>>,
    /// Require the current threshold to lie in the future (`true`) or in
    /// the past (`false`).
    pub selects_unexpired: bool,
}

/// Per-id result of [`InstanceEngine::bulk_delete_with_isolation`].
#[derive(Debug)]
pub struct DeleteOutcome {
    pub id: String,
    pub result: InstanceResult<()>,
}

impl DeleteOutcome {
    pub fn is_fulfilled(&self) -> bool {
        self.result.is_ok()
    }
}

/// The instance state machine.
#[derive(Clone)]
pub struct InstanceEngine {
    records: RecordTable<InstanceRecord>,
}

impl InstanceEngine {
    pub fn new(store: StateStore) -> Self {
        Self {
            records: RecordTable::new(store),
        }
    }

    pub fn get(&self, id: &str) -> InstanceResult<Option<InstanceRecord>> {
        Ok(self.records.get(id)?)
    }

    /// Insert a record in `created` state with no owner.
    ///
    /// With `must_be_new`, an existing record is left alone and `false` is
    /// returned instead of an error.
    pub fn create(
        &self,
        id: &str,
        attrs: &InstanceAttributes,
        must_be_new: bool,
    ) -> InstanceResult<bool> {
        let record = InstanceRecord {
            id: id.to_string(),
            state: InstanceState::Created,
            run_id: String::new(),
            threshold: attrs.threshold.map(format_timestamp).unwrap_or_default(),
            resource_class: attrs.resource_class.clone(),
            instance_type: attrs.instance_type.clone(),
            cpu: attrs.cpu,
            mmem: attrs.mmem,
            usage_class: attrs.usage_class.clone(),
        };
        let condition = must_be_new.then_some(Condition::NotExists);

        match self.records.put(&record, condition.as_ref()) {
            Ok(()) => {
                info!(%id, resource_class = %attrs.resource_class, "instance created");
                Ok(true)
            }
            Err(StateError::ConditionFailed { .. }) => {
                warn!(%id, "instance already exists, creation skipped");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically move a record from the expected `(state, runId)` to the
    /// new `(state, runId, threshold)`.
    ///
    /// On conflict the record is re-read so the error (and the log line)
    /// says which expectation failed. There is no retry here.
    pub fn transition(&self, t: &Transition<'_>) -> InstanceResult<InstanceRecord> {
        let now = Utc::now();
        let freshness = if t.selects_unexpired {
            Condition::time_after(attr::THRESHOLD, now)
        } else {
            Condition::time_before(attr::THRESHOLD, now)
        };
        let condition = Condition::all([
            Condition::equals(attr::STATE, t.expected_state.as_str()),
            Condition::equals(attr::RUN_ID, t.expected_run_id),
            freshness,
        ]);
        let threshold = t.new_threshold.map(format_timestamp).unwrap_or_default();
        let set = [
            Assignment::set(attr::STATE, t.new_state.as_str()),
            Assignment::set(attr::RUN_ID, t.new_run_id),
            Assignment::set(attr::THRESHOLD, threshold.as_str()),
        ];

        match self.records.update(t.id, &condition, &set) {
            Ok(record) => {
                debug!(
                    id = %t.id,
                    from = %t.expected_state,
                    to = %t.new_state,
                    run_id = %t.new_run_id,
                    %threshold,
                    "instance transitioned"
                );
                Ok(record)
            }
            Err(StateError::ConditionFailed { .. }) => {
                let reasons = self.diagnose(t, now);
                warn!(
                    id = %t.id,
                    from = %t.expected_state,
                    to = %t.new_state,
                    reasons = ?reasons,
                    "instance transition conflict"
                );
                Err(InstanceError::TransitionConflict {
                    id: t.id.to_string(),
                    reasons,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Work out which sub-conditions of a failed transition did not hold.
    fn diagnose(&self, t: &Transition<'_>, now: DateTime<Utc>) -> Vec<ConflictReason> {
        let current = match self.records.get(t.id) {
            Ok(Some(record)) => record,
            Ok(None) => return vec![ConflictReason::Missing],
            Err(e) => {
                warn!(id = %t.id, error = %e, "could not re-read record after conflict");
                return Vec::new();
            }
        };

        let mut reasons = Vec::new();
        if current.state != t.expected_state {
            reasons.push(ConflictReason::StateMismatch {
                expected: t.expected_state,
                actual: current.state,
            });
        }
        let fresh = match parse_timestamp(&current.threshold) {
            Some(at) if t.selects_unexpired => at > now,
            Some(at) => at < now,
            None => false,
        };
        if !fresh {
            reasons.push(ConflictReason::ThresholdMismatch {
                selects_unexpired: t.selects_unexpired,
                threshold: current.threshold.clone(),
            });
        }
        if current.run_id != t.expected_run_id {
            reasons.push(ConflictReason::OwnerMismatch {
                expected: t.expected_run_id.to_string(),
                actual: current.run_id,
            });
        }
        reasons
    }

    /// `created/"" → idle/""`: make a freshly created instance claimable.
    pub fn register_idle(
        &self,
        id: &str,
        idle_threshold: DateTime<Utc>,
    ) -> InstanceResult<InstanceRecord> {
        let record = self.transition(&Transition {
            id,
            expected_run_id: "",
            new_run_id: "",
            expected_state: InstanceState::Created,
            new_state: InstanceState::Idle,
            new_threshold: Some(idle_threshold),
            selects_unexpired: true,
        })?;
        info!(%id, "instance registered idle");
        Ok(record)
    }

    /// `idle/"" → claimed/run_id` with a short lease.
    pub fn claim(&self, id: &str, run_id: &str, lease: Duration) -> InstanceResult<InstanceRecord> {
        self.transition(&Transition {
            id,
            expected_run_id: "",
            new_run_id: run_id,
            expected_state: InstanceState::Idle,
            new_state: InstanceState::Claimed,
            new_threshold: Some(add_duration(Utc::now(), lease)),
            selects_unexpired: true,
        })
    }

    /// `claimed/run_id → running/run_id` with the hard runtime deadline.
    pub fn activate(
        &self,
        id: &str,
        run_id: &str,
        deadline: DateTime<Utc>,
    ) -> InstanceResult<InstanceRecord> {
        let record = self.transition(&Transition {
            id,
            expected_run_id: run_id,
            new_run_id: run_id,
            expected_state: InstanceState::Claimed,
            new_state: InstanceState::Running,
            new_threshold: Some(deadline),
            selects_unexpired: true,
        })?;
        info!(%id, %run_id, "instance running");
        Ok(record)
    }

    /// Force the threshold a few minutes into the past, keeping state and
    /// owner, so the next expiry sweep picks the record up.
    ///
    /// With `state` omitted the current state is read first and reused.
    pub fn expire(
        &self,
        id: &str,
        run_id: &str,
        state: Option<InstanceState>,
    ) -> InstanceResult<InstanceRecord> {
        let state = match state {
            Some(s) => s,
            None => {
                self.records
                    .get(id)?
                    .ok_or_else(|| InstanceError::NotFound(id.to_string()))?
                    .state
            }
        };
        let record = self.transition(&Transition {
            id,
            expected_run_id: run_id,
            new_run_id: run_id,
            expected_state: state,
            new_state: state,
            new_threshold: Some(sub_duration(Utc::now(), EXPIRE_BACKDATE)),
            selects_unexpired: true,
        })?;
        info!(%id, %run_id, %state, "instance expired");
        Ok(record)
    }

    /// Records in any of `states` whose threshold is set and already past.
    pub fn query_expired_by_states(
        &self,
        states: &[InstanceState],
    ) -> InstanceResult<Vec<InstanceRecord>> {
        let filter = Condition::all([
            Condition::is_in(attr::STATE, states.iter().map(|s| s.as_str())),
            Condition::not_empty(attr::THRESHOLD),
            Condition::time_before(attr::THRESHOLD, Utc::now()),
        ]);
        let expired = self.records.query(&filter)?;
        debug!(count = expired.len(), ?states, "expired instances queried");
        Ok(expired)
    }

    /// Delete every id, each independently. With `run_id`, a delete only
    /// goes through if the record is still owned by that run.
    pub fn bulk_delete_with_isolation<S: AsRef<str>>(
        &self,
        ids: &[S],
        run_id: Option<&str>,
    ) -> Vec<DeleteOutcome> {
        let condition = run_id.map(|r| Condition::equals(attr::RUN_ID, r));
        ids.iter()
            .map(|id| {
                let id = id.as_ref();
                let result = match self.records.delete(id, condition.as_ref()) {
                    Ok(_) => Ok(()),
                    Err(StateError::ConditionFailed { .. }) => {
                        Err(InstanceError::IsolationConflict {
                            id: id.to_string(),
                            run_id: run_id.unwrap_or_default().to_string(),
                        })
                    }
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = &result {
                    warn!(%id, error = %e, "instance delete rejected");
                }
                DeleteOutcome {
                    id: id.to_string(),
                    result,
                }
            })
            .collect()
    }
}
