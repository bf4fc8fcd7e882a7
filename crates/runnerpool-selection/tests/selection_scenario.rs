//! End-to-end selection against a redb-backed pool.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use runnerpool_core::{pool_queue_name, PoolConfig, ResourceClassSpec, ResourceClassTable};
use runnerpool_health::HealthMonitor;
use runnerpool_instance::{InstanceAttributes, InstanceEngine};
use runnerpool_pool::PoolPickupManager;
use runnerpool_selection::{
    release_instance, select_batch, select_instances, sweep_expired, BatchRequest, ClaimWorker,
};
use runnerpool_state::{InstanceState, PoolQueue, StateStore};

const TOLERANCE: u32 = 5;

fn table() -> ResourceClassTable {
    ResourceClassTable::new().with_class("large", ResourceClassSpec { cpu: 4, mmem: 16384 })
}

fn pool_instance(store: &StateStore, id: &str, instance_type: &str) {
    let engine = InstanceEngine::new(store.clone());
    let later = Utc::now() + ChronoDuration::hours(1);
    let attrs = InstanceAttributes {
        resource_class: "large".to_string(),
        instance_type: instance_type.to_string(),
        cpu: 4,
        mmem: 16384,
        usage_class: "on-demand".to_string(),
        threshold: Some(later),
    };
    assert!(engine.create(id, &attrs, true).unwrap());
    let record = engine.register_idle(id, later).unwrap();
    store
        .send(&pool_queue_name("large"), &record.pool_message())
        .unwrap();
    HealthMonitor::new(store.clone(), Duration::from_secs(15))
        .record_heartbeat(id)
        .unwrap();
}

fn manager(store: &StateStore) -> PoolPickupManager {
    PoolPickupManager::new(
        "large",
        &["c*", "m*"],
        "on-demand",
        table(),
        Arc::new(store.clone()),
    )
    .unwrap()
    .with_frequency_tolerance(TOLERANCE)
}

#[tokio::test]
async fn partial_batch_with_a_cycling_mismatch() {
    let store = StateStore::open_in_memory().unwrap();
    pool_instance(&store, "valid-1", "c6i.xlarge");
    pool_instance(&store, "valid-2", "m6i.xlarge");
    pool_instance(&store, "burstable", "t4g.xlarge");

    let worker = ClaimWorker::new(
        Arc::new(Mutex::new(manager(&store))),
        InstanceEngine::new(store.clone()),
        HealthMonitor::new(store.clone(), Duration::from_secs(15)),
        "run-1",
    );
    let selection = select_batch(&worker, 3).await.unwrap();

    assert_eq!(selection.num_selected, 2);
    assert_eq!(selection.num_required, 1);
    let mut labels = selection.labels.clone();
    labels.sort();
    assert_eq!(labels, vec!["valid-1".to_string(), "valid-2".to_string()]);

    let engine = InstanceEngine::new(store.clone());
    for id in ["valid-1", "valid-2"] {
        let record = engine.get(id).unwrap().unwrap();
        assert_eq!(record.state, InstanceState::Claimed);
        assert_eq!(record.run_id, "run-1");
    }
    assert_eq!(
        engine.get("burstable").unwrap().unwrap().state,
        InstanceState::Idle
    );

    // The mismatched descriptor is still cycling in the pool.
    assert_eq!(store.queue_depth("pool-large").unwrap(), 1);
    let mut next_batch = manager(&store);
    assert_eq!(next_batch.pickup().unwrap(), None);
    assert_eq!(next_batch.frequency("burstable"), TOLERANCE + 1);
    assert_eq!(store.queue_depth("pool-large").unwrap(), 1);
}

#[tokio::test]
async fn concurrent_batches_never_share_an_instance() {
    let store = StateStore::open_in_memory().unwrap();
    for i in 0..4 {
        pool_instance(&store, &format!("i-{i}"), "c6i.xlarge");
    }
    let config = PoolConfig::from_toml(
        r#"
[resource_classes.large]
cpu = 4
mmem = 16384
"#,
    )
    .unwrap();
    let request = |run_id: &str| BatchRequest {
        resource_class: "large".to_string(),
        allowed_types: vec!["c*".to_string()],
        usage_class: "on-demand".to_string(),
        run_id: run_id.to_string(),
        count: 3,
    };

    let (request_a, request_b) = (request("run-a"), request("run-b"));
    let (a, b) = tokio::join!(
        select_instances(&store, &config, &request_a),
        select_instances(&store, &config, &request_b),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.num_selected + b.num_selected, 4);
    assert_eq!(a.num_required + b.num_required, 2);
    let mut all: Vec<String> = a.labels.iter().chain(&b.labels).cloned().collect();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn released_instance_is_selectable_again_and_swept_when_expired() {
    let store = StateStore::open_in_memory().unwrap();
    pool_instance(&store, "i-1", "c6i.xlarge");
    let engine = InstanceEngine::new(store.clone());
    let health = HealthMonitor::new(store.clone(), Duration::from_secs(15));

    let first = select_batch(
        &ClaimWorker::new(
            Arc::new(Mutex::new(manager(&store))),
            engine.clone(),
            health.clone(),
            "run-1",
        ),
        1,
    )
    .await
    .unwrap();
    assert_eq!(first.labels, vec!["i-1".to_string()]);

    release_instance(&engine, &store, "i-1", "run-1", Duration::from_secs(3600)).unwrap();

    let second = select_batch(
        &ClaimWorker::new(
            Arc::new(Mutex::new(manager(&store))),
            engine.clone(),
            health,
            "run-2",
        ),
        1,
    )
    .await
    .unwrap();
    assert_eq!(second.labels, vec!["i-1".to_string()]);
    assert_eq!(engine.get("i-1").unwrap().unwrap().run_id, "run-2");

    engine.expire("i-1", "run-2", None).unwrap();
    let report = sweep_expired(&engine, &[InstanceState::Claimed, InstanceState::Running]).unwrap();
    assert_eq!(report.terminated, vec!["i-1".to_string()]);
    assert!(engine.get("i-1").unwrap().is_none());
}
