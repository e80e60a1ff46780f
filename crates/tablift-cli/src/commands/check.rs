use std::path::Path;

use anyhow::{Context, Result};
use tablift_engine::config::datasets::load_datasets;
use tablift_engine::config::ServiceConfig;
use tablift_engine::scheduler::trigger::CronTrigger;
use tablift_engine::transform::StepRegistry;

/// Execute the `check` command: validate the service configuration, every
/// dataset spec, its cron expression, and its transformation chain.
pub async fn execute(config_path: &Path) -> Result<()> {
    let config = ServiceConfig::load(config_path)
        .with_context(|| format!("Failed to load service config: {}", config_path.display()))?;
    println!("Service config OK ({})", config_path.display());
    println!("  Environment:  {}", config.environment);
    println!("  Datasets dir: {}", config.datasets_dir.display());

    // Surfaces secret-store misconfiguration before the first execution.
    let store = config.build_secret_store()?;
    let store_name = store.map_or_else(|| "none".to_string(), |s| s.provider_name().to_string());
    println!("  Secret store: {store_name}");

    let registry = StepRegistry::builtin();
    let specs = load_datasets(&config.datasets_dir);
    println!("Datasets loaded: {}", specs.len());

    let now = chrono::Utc::now();
    let mut problems = 0usize;
    for spec in &specs {
        let mut notes = Vec::new();
        if let Err(err) = CronTrigger::new(&spec.cron, now) {
            notes.push(err.to_string());
        }
        if let Err(err) = registry.build_plan(&spec.transformations) {
            notes.push(err.to_string());
        }
        if config.connection_template(&spec.source.connection_key).is_err() {
            notes.push(format!(
                "unknown connection key '{}'",
                spec.source.connection_key
            ));
        }

        if notes.is_empty() {
            let state = if spec.enabled { "enabled" } else { "disabled" };
            println!("  {} - OK ({state}, cron '{}')", spec.id, spec.cron);
        } else {
            problems += 1;
            println!("  {} - INVALID", spec.id);
            for note in notes {
                println!("      {note}");
            }
        }
    }

    if problems > 0 {
        anyhow::bail!("{problems} dataset spec(s) failed validation");
    }
    Ok(())
}
