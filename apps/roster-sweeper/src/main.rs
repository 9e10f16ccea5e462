use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use clap::Parser;
use roster_config::{ConfigError, EngineConfig};
use roster_core::{CoreError, GroupService, OutcomeDrain, SweepReport};
use roster_events_memory::MemoryEventBus;
use roster_storage::StoreError;
use roster_store_memory::{MemoryAuditLog, MemoryStore};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum SweeperError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("sweep failed: {0}")]
    Sweep(#[from] CoreError),
}

#[derive(Parser)]
#[command(name = "roster-sweeper")]
#[command(about = "Replays scheduled membership changes once they fall due")]
struct Args {
    /// Engine config file (defaults to ~/.roster/config.json)
    #[arg(long, env = "ROSTER_CONFIG")]
    config: Option<PathBuf>,

    /// JSON snapshot backing the store; overrides the config value
    #[arg(long, env = "ROSTER_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,

    /// Sweep as of this date instead of today (YYYY-MM-DD)
    #[arg(long)]
    today: Option<NaiveDate>,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let config = match path {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load_or_default()?,
    }
    .apply_env()?;
    config.validate()?;
    Ok(config)
}

/// One sweep: replay due jobs, drain their outcomes, persist the store.
async fn sweep_once(
    service: &GroupService,
    store: &MemoryStore,
    drain: &OutcomeDrain,
    snapshot: Option<&Path>,
    today: NaiveDate,
) -> Result<SweepReport, SweeperError> {
    let report = service.run_sweep(today).await?;
    for outcome in &report.outcomes {
        drain.drain(outcome).await;
    }
    for entry in &report.audit {
        drain.record(entry.clone()).await;
    }
    for (job_id, reason) in &report.failed {
        warn!(job_id = %job_id, reason = %reason, "job will be retried next sweep");
    }
    if let Some(path) = snapshot {
        store.save_snapshot(path).await?;
    }
    Ok(report)
}

fn sweep_date(fixed: Option<NaiveDate>) -> NaiveDate {
    fixed.unwrap_or_else(|| chrono::Local::now().date_naive())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let snapshot = args.snapshot.or_else(|| config.snapshot_path.clone());
    let store = Arc::new(match &snapshot {
        Some(path) => MemoryStore::load_snapshot(path).await?,
        None => {
            warn!("no snapshot configured, sweeping an empty store");
            MemoryStore::new()
        }
    });
    let service = GroupService::new(store.clone(), &config);
    let drain = OutcomeDrain::new(
        Arc::new(MemoryEventBus::new()),
        Arc::new(MemoryAuditLog::new()),
    );

    info!(
        snapshot = ?snapshot,
        interval_secs = config.sweep_interval_secs,
        once = args.once,
        "Starting roster-sweeper"
    );

    if args.once {
        let report = sweep_once(
            &service,
            &store,
            &drain,
            snapshot.as_deref(),
            sweep_date(args.today),
        )
        .await?;
        info!(
            processed = report.processed.len(),
            failed = report.failed.len(),
            "single sweep done"
        );
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(config.sweep_interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = sweep_once(
                    &service,
                    &store,
                    &drain,
                    snapshot.as_deref(),
                    sweep_date(args.today),
                )
                .await
                {
                    error!("Sweep failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C, shutting down...");
                break;
            }
        }
    }

    if let Some(path) = &snapshot {
        store.save_snapshot(path).await?;
    }
    Ok(())
}
