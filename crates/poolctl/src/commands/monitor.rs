use std::time::Duration;

use runnerpool_core::PoolConfig;
use runnerpool_health::{HealthMonitor, PollOutcome, SignalMonitor, SignalPoll};
use runnerpool_state::StateStore;

fn health_monitor(store: &StateStore, config: &PoolConfig) -> HealthMonitor {
    HealthMonitor::new(store.clone(), config.heartbeat_period())
        .with_multiplier(config.health_multiplier())
}

fn report(outcome: PollOutcome) -> anyhow::Result<()> {
    if outcome.state {
        println!("{}", outcome.message);
        Ok(())
    } else {
        anyhow::bail!(outcome.message)
    }
}

pub fn heartbeat(store: &StateStore, config: &PoolConfig, id: &str) -> anyhow::Result<()> {
    health_monitor(store, config).record_heartbeat(id)?;
    Ok(())
}

pub fn signal(store: &StateStore, id: &str, state: &str, run_id: &str) -> anyhow::Result<()> {
    SignalMonitor::new(store.clone()).record_signal(id, state, run_id)?;
    Ok(())
}

pub async fn wait_healthy(
    store: &StateStore,
    config: &PoolConfig,
    ids: &[String],
    timeout: Duration,
    interval: Duration,
) -> anyhow::Result<()> {
    let outcome = health_monitor(store, config)
        .poll_all_healthy(ids, timeout, interval)
        .await;
    report(outcome)
}

pub async fn wait_signal(
    store: &StateStore,
    ids: Vec<String>,
    run_id: String,
    signal: String,
    timeout: Duration,
    interval: Duration,
) -> anyhow::Result<()> {
    let poll = SignalPoll {
        ids,
        run_id,
        signal,
        timeout,
        interval,
    };
    let outcome = SignalMonitor::new(store.clone()).poll_on_signal(&poll).await?;
    report(outcome)
}
