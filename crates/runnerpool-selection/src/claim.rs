//! Claim worker: one slot of a selection batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use runnerpool_core::config::DEFAULT_CLAIM_LEASE;
use runnerpool_health::{HealthMonitor, HealthStatus};
use runnerpool_instance::InstanceEngine;
use runnerpool_pool::PoolPickupManager;
use runnerpool_state::PoolMessage;

use crate::error::SelectionResult;

/// What one claim worker produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    pub message: String,
    /// The claimed instance, or `None` if the pool ran dry first.
    pub payload: Option<PoolMessage>,
}

/// Picks, claims, and health-checks instances until one passes or the pool
/// reports empty.
///
/// Cloning shares the pickup manager, so every clone draws from the same
/// frequency map.
#[derive(Clone)]
pub struct ClaimWorker {
    manager: Arc<Mutex<PoolPickupManager>>,
    engine: InstanceEngine,
    health: HealthMonitor,
    run_id: String,
    claim_lease: Duration,
}

impl ClaimWorker {
    pub fn new(
        manager: Arc<Mutex<PoolPickupManager>>,
        engine: InstanceEngine,
        health: HealthMonitor,
        run_id: &str,
    ) -> Self {
        Self {
            manager,
            engine,
            health,
            run_id: run_id.to_string(),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn manager(&self) -> &Arc<Mutex<PoolPickupManager>> {
        &self.manager
    }

    /// Run the slot to completion. A lost claim moves on to the next
    /// message; store or queue failures end the slot with an error.
    pub async fn run(&self) -> SelectionResult<ClaimOutcome> {
        let outcome = match self.claim_one().await {
            Ok(Some(instance)) => ClaimOutcome {
                message: format!("claimed {} for {}", instance.id, self.run_id),
                payload: Some(instance),
            },
            Ok(None) => ClaimOutcome {
                message: "pool exhausted".to_string(),
                payload: None,
            },
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "claim worker failed");
                return Err(e);
            }
        };
        Ok(outcome)
    }

    async fn claim_one(&self) -> SelectionResult<Option<PoolMessage>> {
        loop {
            let picked = self.manager.lock().await.pickup()?;
            let Some(instance) = picked else {
                return Ok(None);
            };

            match self.engine.claim(&instance.id, &self.run_id, self.claim_lease) {
                Ok(_) => debug!(id = %instance.id, run_id = %self.run_id, "instance claimed"),
                Err(e) if e.is_conflict() => {
                    debug!(id = %instance.id, error = %e, "claim lost, picking another");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }

            // The claim is not undone here; its lease runs out and the
            // expiry sweep reclaims the instance.
            match self.health.classify(&instance.id)? {
                HealthStatus::Healthy => {
                    info!(id = %instance.id, run_id = %self.run_id, "instance selected");
                    return Ok(Some(instance));
                }
                status => {
                    warn!(id = %instance.id, ?status, "claimed instance not healthy, abandoning");
                }
            }
        }
    }
}
