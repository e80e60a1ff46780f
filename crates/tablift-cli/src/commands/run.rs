use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tablift_engine::config::datasets::load_datasets;
use tablift_engine::config::ServiceConfig;
use tablift_engine::scheduler::{run_dataset_once, SchedulerDeps};
use tablift_types::ExecutionState;
use tokio_util::sync::CancellationToken;

/// Execute the `run` command: one dataset, one execution, then exit.
pub async fn execute(config_path: &Path, dataset_id: &str) -> Result<()> {
    let config = ServiceConfig::load(config_path)
        .with_context(|| format!("Failed to load service config: {}", config_path.display()))?;
    let deps = SchedulerDeps::from_config(Arc::new(config))?;

    let spec = load_datasets(&deps.config.datasets_dir)
        .into_iter()
        .find(|s| s.id == dataset_id)
        .with_context(|| format!("No dataset spec with id '{dataset_id}'"))?;

    let execution = run_dataset_once(&deps, Arc::new(spec), CancellationToken::new()).await?;

    println!("Execution {} finished: {}", execution.execution_id, execution.state);
    if let Some(uri) = &execution.published_uri {
        println!("  Published:   {uri}");
    }
    if let Some(name) = &execution.control_file_name {
        println!("  Control:     {name}");
    }
    println!("  Errors:      {}", execution.error_count());
    for error in &execution.errors {
        println!("    [{}] {}: {}", error.severity, error.stage, error.message);
    }

    match execution.state {
        ExecutionState::Succeeded => Ok(()),
        other => anyhow::bail!("execution ended in state '{other}'"),
    }
}
