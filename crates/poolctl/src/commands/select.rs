use runnerpool_core::PoolConfig;
use runnerpool_instance::InstanceEngine;
use runnerpool_selection::{release_instance, select_instances, sweep_expired, BatchRequest};
use runnerpool_state::{InstanceState, StateStore};

pub async fn select(
    store: &StateStore,
    config: &PoolConfig,
    resource_class: String,
    allowed_types: Vec<String>,
    usage_class: String,
    run_id: String,
    count: usize,
) -> anyhow::Result<()> {
    let request = BatchRequest {
        resource_class,
        allowed_types,
        usage_class,
        run_id,
        count,
    };
    let selection = select_instances(store, config, &request).await?;
    println!("{}", serde_json::to_string_pretty(&selection)?);
    Ok(())
}

pub fn release(store: &StateStore, config: &PoolConfig, id: &str, run_id: &str) -> anyhow::Result<()> {
    let engine = InstanceEngine::new(store.clone());
    let record = release_instance(&engine, store, id, run_id, config.idle_ttl())?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub fn sweep(store: &StateStore, states: &[String]) -> anyhow::Result<()> {
    let states = states
        .iter()
        .map(|s| s.parse::<InstanceState>().map_err(anyhow::Error::msg))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let engine = InstanceEngine::new(store.clone());
    let report = sweep_expired(&engine, &states)?;
    for id in &report.terminated {
        println!("terminated {id}");
    }
    for id in &report.skipped {
        println!("skipped {id}");
    }
    Ok(())
}
