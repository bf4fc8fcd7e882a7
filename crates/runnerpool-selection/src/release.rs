//! Returning an instance to its pool once a run is done with it.

use std::time::Duration;

use chrono::Utc;
use tracing::info;

use runnerpool_core::{add_duration, pool_queue_name};
use runnerpool_instance::{InstanceEngine, InstanceError, Transition};
use runnerpool_state::{InstanceRecord, InstanceState, PoolQueue};

use crate::error::{SelectionError, SelectionResult};

/// `claimed|running/run_id → idle/""`, then put the instance's descriptor
/// back on its resource-class queue.
///
/// The new idle threshold is `now + idle_ttl`. A record whose threshold
/// already passed is left for the expiry sweep.
pub fn release_instance(
    engine: &InstanceEngine,
    queue: &dyn PoolQueue,
    id: &str,
    run_id: &str,
    idle_ttl: Duration,
) -> SelectionResult<InstanceRecord> {
    let current = engine
        .get(id)?
        .ok_or_else(|| InstanceError::NotFound(id.to_string()))?;
    if !matches!(current.state, InstanceState::Claimed | InstanceState::Running) {
        return Err(SelectionError::NotReleasable {
            id: id.to_string(),
            state: current.state,
        });
    }

    let released = engine.transition(&Transition {
        id,
        expected_run_id: run_id,
        new_run_id: "",
        expected_state: current.state,
        new_state: InstanceState::Idle,
        new_threshold: Some(add_duration(Utc::now(), idle_ttl)),
        selects_unexpired: true,
    })?;

    let queue_name = pool_queue_name(&released.resource_class);
    queue.send(&queue_name, &released.pool_message())?;
    info!(%id, %run_id, queue = %queue_name, "instance released to pool");
    Ok(released)
}
