//! poolctl — operator and worker CLI for the runner pool.
//!
//! ```text
//! poolctl register --id i-1 --resource-class large --instance-type c6i.xlarge --cpu 4 --mmem 16384
//! poolctl select --resource-class large --types 'c*,m*' --run-id run-42 --count 3
//! poolctl wait-signal --ids i-1,i-2 --run-id run-42 --signal UD_REG_OK
//! poolctl release --id i-1 --run-id run-42
//! poolctl sweep
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{debug, info};

use runnerpool_core::{parse_duration, PoolConfig};
use runnerpool_state::StateStore;

mod commands;

#[derive(Parser)]
#[command(
    name = "poolctl",
    about = "Runner pool coordination: claim, release, sweep, observe",
    version,
    propagate_version = true
)]
struct Cli {
    /// Configuration file. Defaults apply if it does not exist.
    #[arg(short, long, default_value = "runnerpool.toml", global = true)]
    config: PathBuf,

    /// Override the record store path from the configuration.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an instance record and put it in its idle pool.
    Register {
        #[arg(long)]
        id: String,
        #[arg(long)]
        resource_class: String,
        #[arg(long)]
        instance_type: String,
        #[arg(long)]
        cpu: u32,
        /// Memory in MiB.
        #[arg(long)]
        mmem: u64,
        #[arg(long, default_value = "on-demand")]
        usage_class: String,
    },
    /// Claim a batch of healthy instances for a run.
    Select {
        #[arg(long)]
        resource_class: String,
        /// Allowed instance-type patterns; `*` is a wildcard.
        #[arg(long, value_delimiter = ',', default_value = "*")]
        types: Vec<String>,
        #[arg(long, default_value = "on-demand")]
        usage_class: String,
        #[arg(long)]
        run_id: String,
        #[arg(long, default_value = "1")]
        count: usize,
    },
    /// Mark a claimed instance as running until a hard deadline.
    Activate {
        #[arg(long)]
        id: String,
        #[arg(long)]
        run_id: String,
        /// Maximum runtime, e.g. "6h".
        #[arg(long, value_parser = duration_arg)]
        deadline: Duration,
    },
    /// Hand an instance back to its pool.
    Release {
        #[arg(long)]
        id: String,
        #[arg(long)]
        run_id: String,
    },
    /// Force an instance's threshold into the past.
    Expire {
        #[arg(long)]
        id: String,
        #[arg(long)]
        run_id: String,
    },
    /// Terminate and delete records whose threshold has passed.
    Sweep {
        #[arg(long, value_delimiter = ',', default_value = "claimed,running")]
        states: Vec<String>,
    },
    /// Print an instance record.
    Status {
        #[arg(long)]
        id: String,
    },
    /// Write a heartbeat, as a worker does.
    Heartbeat {
        #[arg(long)]
        id: String,
    },
    /// Write a milestone signal, as a worker does.
    Signal {
        #[arg(long)]
        id: String,
        #[arg(long)]
        state: String,
        #[arg(long)]
        run_id: String,
    },
    /// Wait until every instance has a fresh heartbeat.
    WaitHealthy {
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,
        #[arg(long, value_parser = duration_arg, default_value = "5m")]
        timeout: Duration,
        #[arg(long, value_parser = duration_arg, default_value = "10s")]
        interval: Duration,
    },
    /// Wait until every instance reports a milestone for a run.
    WaitSignal {
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,
        #[arg(long)]
        run_id: String,
        /// OK literal of the milestone, e.g. UD_REG_OK.
        #[arg(long)]
        signal: String,
        #[arg(long, value_parser = duration_arg, default_value = "5m")]
        timeout: Duration,
        #[arg(long, value_parser = duration_arg, default_value = "10s")]
        interval: Duration,
    },
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).ok_or_else(|| format!("invalid duration: {s:?}"))
}

fn load_config(path: &Path) -> anyhow::Result<PoolConfig> {
    if path.exists() {
        let config = PoolConfig::from_file(path)?;
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    } else {
        debug!(path = %path.display(), "no configuration file, using defaults");
        Ok(PoolConfig::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,poolctl=debug,runnerpool=debug"))?,
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let store_path = cli.store.unwrap_or_else(|| config.store_path());
    if let Some(dir) = store_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = StateStore::open(&store_path)?;
    debug!(path = %store_path.display(), "record store opened");

    match cli.command {
        Command::Register {
            id,
            resource_class,
            instance_type,
            cpu,
            mmem,
            usage_class,
        } => commands::instance::register(
            &store,
            &config,
            &id,
            commands::instance::Sizing {
                resource_class,
                instance_type,
                cpu,
                mmem,
                usage_class,
            },
        ),
        Command::Select {
            resource_class,
            types,
            usage_class,
            run_id,
            count,
        } => {
            commands::select::select(&store, &config, resource_class, types, usage_class, run_id, count)
                .await
        }
        Command::Activate {
            id,
            run_id,
            deadline,
        } => commands::instance::activate(&store, &id, &run_id, deadline),
        Command::Release { id, run_id } => commands::select::release(&store, &config, &id, &run_id),
        Command::Expire { id, run_id } => commands::instance::expire(&store, &id, &run_id),
        Command::Sweep { states } => commands::select::sweep(&store, &states),
        Command::Status { id } => commands::instance::status(&store, &id),
        Command::Heartbeat { id } => commands::monitor::heartbeat(&store, &config, &id),
        Command::Signal { id, state, run_id } => {
            commands::monitor::signal(&store, &id, &state, &run_id)
        }
        Command::WaitHealthy {
            ids,
            timeout,
            interval,
        } => commands::monitor::wait_healthy(&store, &config, &ids, timeout, interval).await,
        Command::WaitSignal {
            ids,
            run_id,
            signal,
            timeout,
            interval,
        } => commands::monitor::wait_signal(&store, ids, run_id, signal, timeout, interval).await,
    }
}
