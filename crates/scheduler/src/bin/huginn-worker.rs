//! Standalone scheduler worker over the in-memory store.
//!
//! Loads action definitions (and optionally host snapshots) from JSON
//! files, runs the scheduling loop until Ctrl-C, then prints a queue
//! summary. Useful for exercising catalogs locally before pointing the
//! scheduler at a durable backend.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use huginn_core::{ActionDefinition, HostSnapshot, RuntimeConfig};
use huginn_scheduler::{ActionScheduler, SchedulerConfig};
use huginn_store::{
    MemoryFactStore, MemoryQueueStore, QueueFilter, QueueStore, StaticActionProvider,
    StaticHostProvider,
};

#[derive(Parser, Debug)]
#[command(name = "huginn-worker", about = "Run the action scheduler loop")]
struct Args {
    /// JSON file containing an array of action definitions.
    #[arg(long, env = "HUGINN_ACTIONS")]
    actions: PathBuf,

    /// JSON file containing an array of host snapshots.
    #[arg(long, env = "HUGINN_HOSTS")]
    hosts: Option<PathBuf>,

    /// Seconds between scheduling ticks.
    #[arg(long, env = "HUGINN_TICK_SECS", default_value_t = 5)]
    tick_secs: u64,

    /// Identity global actions are queued under.
    #[arg(long, env = "HUGINN_CONTROLLER_MAC", default_value = "__global__")]
    controller_mac: String,

    /// Re-queue actions that already succeeded.
    #[arg(long)]
    retry_success: bool,

    /// Disable backoff retry of failed entries.
    #[arg(long)]
    no_retry_failed: bool,
}

fn load_json<T: serde::de::DeserializeOwned>(path: &PathBuf, what: &str) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {what} from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {what} from {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let actions: Vec<ActionDefinition> = load_json(&args.actions, "action definitions")?;
    let hosts: Vec<HostSnapshot> = match &args.hosts {
        Some(path) => load_json(path, "host snapshots")?,
        None => Vec::new(),
    };
    tracing::info!(
        actions = actions.len(),
        hosts = hosts.len(),
        "loaded worker inputs"
    );

    let runtime = Arc::new(RuntimeConfig::new());
    runtime.set_retry_success(args.retry_success);
    runtime.set_retry_failed(!args.no_retry_failed);

    let store = Arc::new(MemoryQueueStore::new());
    let config = SchedulerConfig {
        tick_interval: Duration::from_secs(args.tick_secs.max(1)),
        controller_mac: args.controller_mac,
        ..Default::default()
    };

    let mut scheduler = ActionScheduler::new(
        config,
        runtime,
        store.clone(),
        Arc::new(MemoryFactStore::new()),
        Arc::new(StaticHostProvider::new(hosts)),
        Arc::new(StaticActionProvider::new(actions)),
    );
    let handle = scheduler.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            handle.stop();
        }
    });

    scheduler.run().await;

    // Final queue summary, grouped by status.
    let entries = store.query(&QueueFilter::new()).await?;
    let mut by_status: BTreeMap<&'static str, u64> = BTreeMap::new();
    for entry in &entries {
        *by_status.entry(entry.status.as_str()).or_default() += 1;
    }
    tracing::info!(total = entries.len(), ?by_status, "final queue state");

    Ok(())
}
