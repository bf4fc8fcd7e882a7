//! Batch selection: fan out one claim worker per required instance.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

use runnerpool_core::PoolConfig;
use runnerpool_health::HealthMonitor;
use runnerpool_instance::InstanceEngine;
use runnerpool_pool::PoolPickupManager;
use runnerpool_state::{PoolMessage, StateStore};

use crate::claim::ClaimWorker;
use crate::error::SelectionResult;

/// What a job run asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub resource_class: String,
    pub allowed_types: Vec<String>,
    pub usage_class: String,
    pub run_id: String,
    pub count: usize,
}

/// Result of one selection batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSelection {
    pub num_selected: usize,
    /// Instances still missing from the batch.
    pub num_required: usize,
    pub instances: Vec<PoolMessage>,
    /// Instance ids, in slot order.
    pub labels: Vec<String>,
}

/// Run `count` clones of `worker` concurrently and collect the payloads.
///
/// Every slot runs to completion. If any slot hit a store or queue failure
/// the batch fails with the first such error; instances claimed by the other
/// slots keep their lease and are reclaimed by the expiry sweep.
pub async fn select_batch(worker: &ClaimWorker, count: usize) -> SelectionResult<BatchSelection> {
    let mut workers = JoinSet::new();
    for slot in 0..count {
        let worker = worker.clone();
        workers.spawn(async move { (slot, worker.run().await) });
    }

    let mut outcomes = Vec::with_capacity(count);
    let mut failure = None;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((slot, Ok(outcome))) => outcomes.push((slot, outcome)),
            Ok((slot, Err(e))) => {
                if failure.is_none() {
                    failure = Some(e);
                } else {
                    warn!(slot, error = %e, "additional claim worker failure");
                }
            }
            Err(e) => warn!(error = %e, "claim worker task failed"),
        }
    }
    if let Some(e) = failure {
        warn!(
            run_id = %worker.run_id(),
            claimed = outcomes.iter().filter(|(_, o)| o.payload.is_some()).count(),
            error = %e,
            "selection batch failed"
        );
        return Err(e);
    }
    outcomes.sort_by_key(|(slot, _)| *slot);

    let instances: Vec<PoolMessage> = outcomes
        .into_iter()
        .filter_map(|(_, outcome)| outcome.payload)
        .collect();
    let labels: Vec<String> = instances.iter().map(|m| m.id.clone()).collect();
    let selection = BatchSelection {
        num_selected: instances.len(),
        num_required: count.saturating_sub(instances.len()),
        instances,
        labels,
    };
    info!(
        run_id = %worker.run_id(),
        selected = selection.num_selected,
        required = selection.num_required,
        "selection batch finished"
    );
    Ok(selection)
}

/// Build a fresh pickup manager and claim workers from configuration, then
/// run one batch.
///
/// Fails when the request is malformed (unknown resource class or a bad
/// instance-type pattern) or when the store or pool queue fails mid-batch.
pub async fn select_instances(
    store: &StateStore,
    config: &PoolConfig,
    request: &BatchRequest,
) -> SelectionResult<BatchSelection> {
    let manager = PoolPickupManager::new(
        &request.resource_class,
        &request.allowed_types,
        &request.usage_class,
        config.resource_classes.clone(),
        Arc::new(store.clone()),
    )?
    .with_frequency_tolerance(config.frequency_tolerance());

    let health = HealthMonitor::new(store.clone(), config.heartbeat_period())
        .with_multiplier(config.health_multiplier());
    let worker = ClaimWorker::new(
        Arc::new(Mutex::new(manager)),
        InstanceEngine::new(store.clone()),
        health,
        &request.run_id,
    )
    .with_claim_lease(config.claim_lease());

    select_batch(&worker, request.count).await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use runnerpool_core::{ResourceClassSpec, ResourceClassTable};
    use runnerpool_pool::PoolError;
    use runnerpool_state::{PoolQueue, StateError, StateResult};

    use crate::error::SelectionError;

    /// A queue whose backend is unreachable.
    struct DownQueue;

    impl PoolQueue for DownQueue {
        fn receive_one(&self, _queue: &str) -> StateResult<Option<PoolMessage>> {
            Err(StateError::Transaction("queue down".to_string()))
        }

        fn send(&self, _queue: &str, _message: &PoolMessage) -> StateResult<()> {
            Err(StateError::Transaction("queue down".to_string()))
        }
    }

    fn config() -> PoolConfig {
        PoolConfig::from_toml(
            r#"
[resource_classes.large]
cpu = 4
mmem = 16384
"#,
        )
        .unwrap()
    }

    fn request(resource_class: &str, count: usize) -> BatchRequest {
        BatchRequest {
            resource_class: resource_class.to_string(),
            allowed_types: vec!["*".to_string()],
            usage_class: "on-demand".to_string(),
            run_id: "run-1".to_string(),
            count,
        }
    }

    #[tokio::test]
    async fn empty_pool_reports_full_shortfall() {
        let store = StateStore::open_in_memory().unwrap();
        let selection = select_instances(&store, &config(), &request("large", 2))
            .await
            .unwrap();
        assert_eq!(selection.num_selected, 0);
        assert_eq!(selection.num_required, 2);
        assert!(selection.labels.is_empty());
    }

    #[tokio::test]
    async fn unknown_class_is_an_error() {
        let store = StateStore::open_in_memory().unwrap();
        let err = select_instances(&store, &config(), &request("huge", 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SelectionError::Pool(PoolError::InvalidResourceClass(_))
        ));
    }

    #[tokio::test]
    async fn queue_failure_fails_the_batch() {
        let store = StateStore::open_in_memory().unwrap();
        let table = ResourceClassTable::new()
            .with_class("large", ResourceClassSpec { cpu: 4, mmem: 16384 });
        let manager =
            PoolPickupManager::new("large", &["*"], "on-demand", table, Arc::new(DownQueue))
                .unwrap();
        let worker = ClaimWorker::new(
            Arc::new(Mutex::new(manager)),
            InstanceEngine::new(store.clone()),
            HealthMonitor::new(store, Duration::from_secs(15)),
            "run-1",
        );

        let err = select_batch(&worker, 2).await.unwrap_err();
        assert!(matches!(
            err,
            SelectionError::Pool(PoolError::Upstream(StateError::Transaction(_)))
        ));
    }

    #[test]
    fn selection_serializes_camel_case() {
        let selection = BatchSelection {
            num_selected: 0,
            num_required: 1,
            instances: Vec::new(),
            labels: Vec::new(),
        };
        let json = serde_json::to_value(&selection).unwrap();
        assert_eq!(json["numSelected"], 0);
        assert_eq!(json["numRequired"], 1);
    }
}
