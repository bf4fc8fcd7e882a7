use std::time::Duration;

use chrono::Utc;

use runnerpool_core::{add_duration, pool_queue_name, PoolConfig};
use runnerpool_instance::{InstanceAttributes, InstanceEngine};
use runnerpool_state::{PoolQueue, StateStore};

/// Sizing metadata passed on the command line.
pub struct Sizing {
    pub resource_class: String,
    pub instance_type: String,
    pub cpu: u32,
    pub mmem: u64,
    pub usage_class: String,
}

pub fn register(
    store: &StateStore,
    config: &PoolConfig,
    id: &str,
    sizing: Sizing,
) -> anyhow::Result<()> {
    if !config.resource_classes.contains(&sizing.resource_class) {
        anyhow::bail!("unknown resource class: {}", sizing.resource_class);
    }
    let engine = InstanceEngine::new(store.clone());
    let idle_until = add_duration(Utc::now(), config.idle_ttl());
    let attrs = InstanceAttributes {
        resource_class: sizing.resource_class,
        instance_type: sizing.instance_type,
        cpu: sizing.cpu,
        mmem: sizing.mmem,
        usage_class: sizing.usage_class,
        threshold: Some(idle_until),
    };
    if !engine.create(id, &attrs, true)? {
        anyhow::bail!("instance {id} already exists");
    }
    let record = engine.register_idle(id, idle_until)?;
    store.send(&pool_queue_name(&record.resource_class), &record.pool_message())?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub fn activate(store: &StateStore, id: &str, run_id: &str, deadline: Duration) -> anyhow::Result<()> {
    let engine = InstanceEngine::new(store.clone());
    let record = engine.activate(id, run_id, add_duration(Utc::now(), deadline))?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub fn expire(store: &StateStore, id: &str, run_id: &str) -> anyhow::Result<()> {
    let engine = InstanceEngine::new(store.clone());
    let record = engine.expire(id, run_id, None)?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

pub fn status(store: &StateStore, id: &str) -> anyhow::Result<()> {
    let engine = InstanceEngine::new(store.clone());
    match engine.get(id)? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => anyhow::bail!("instance not found: {id}"),
    }
    Ok(())
}
