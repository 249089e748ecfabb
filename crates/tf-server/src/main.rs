//! tapflow
//!
//! Loads the configured rule-sets, replays a recorded snapshot stream through
//! them and prints every trigger as a JSON line.

mod replay;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tf_config::{EngineConfig, CONFIG_ENV_VAR};
use tf_engine::{SharedTriggerBus, TriggerBus};

use crate::replay::{manager_for, replay, TriggerLogger};

#[derive(Parser, Debug)]
#[command(
    name = "tapflow",
    version,
    about = "Evaluate UI trigger rules against recorded snapshot streams"
)]
struct Cli {
    /// Configuration file
    #[arg(long, short, env = CONFIG_ENV_VAR)]
    config: PathBuf,

    /// Snapshot stream (JSON lines); stdin when omitted or `-`
    #[arg(long, short)]
    snapshots: Option<PathBuf>,

    /// Pause between snapshots, in milliseconds
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,

    /// How long to keep running after the stream ends so pending delays
    /// can fire, in milliseconds
    #[arg(long, default_value_t = 1000)]
    linger_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = EngineConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(config = %cli.config.display(), "Starting tapflow");

    let bus: SharedTriggerBus = Arc::new(TriggerBus::with_capacity(config.bus_capacity));
    let manager = manager_for(&bus);
    let logger = TriggerLogger::new(bus.clone());
    let logger_task = logger.start();

    for rule_set in config.load_rule_sets().await? {
        for err in &rule_set.report.errors {
            error!(rule_set = %rule_set.id, "{}", err);
        }
        if rule_set.report.rules.is_empty() {
            warn!(rule_set = %rule_set.id, "No usable rules, not activating");
            continue;
        }
        manager.activate(rule_set.id, rule_set.report.rules);
    }
    if manager.is_empty() {
        warn!("No active rule-sets");
    }

    let interval = Duration::from_millis(cli.interval_ms);
    let stats = match cli.snapshots.as_ref().filter(|p| p.as_os_str() != "-") {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening snapshot stream {}", path.display()))?;
            replay(&manager, BufReader::new(file), interval).await?
        }
        None => replay(&manager, BufReader::new(tokio::io::stdin()), interval).await?,
    };

    tokio::time::sleep(Duration::from_millis(cli.linger_ms)).await;
    manager.deactivate_all();
    logger.stop();
    let triggers = logger_task.await.unwrap_or_default();

    info!(
        records = stats.records,
        absent = stats.absent,
        skipped = stats.skipped,
        triggers,
        "Replay complete"
    );
    Ok(())
}
