use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tablift_engine::config::ServiceConfig;
use tablift_engine::scheduler::{Scheduler, SchedulerDeps};
use tokio_util::sync::CancellationToken;

/// Execute the `serve` command: run the scheduler until interrupted.
///
/// A configuration file that fails to load is a startup failure (non-zero
/// exit). An empty or missing datasets directory is not: the service runs
/// with an empty schedule.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = ServiceConfig::load(config_path)
        .with_context(|| format!("Failed to load service config: {}", config_path.display()))?;
    let deps = SchedulerDeps::from_config(Arc::new(config))?;

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(deps, cancel.clone());

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            signal_cancel.cancel();
        }
    });

    scheduler.run().await;
    tracing::info!("Scheduler stopped");
    Ok(())
}
