//! Dataset scheduler.
//!
//! One dispatcher loop owns every trigger: it loads dataset specs, compiles
//! their cron expressions, and on each tick fires whichever datasets are
//! due. Each fire spawns a worker that builds a fresh [`JobContext`] and
//! drives the pipeline. Concurrency per dataset is exclusive: a fire that
//! overlaps a running execution is skipped with a log line, never queued.
//! Worker failures are recorded; the loop itself never dies from one.

pub mod render;
pub mod trigger;

use crate::config::datasets::{load_datasets, parameters_to_list, spec_fingerprint};
use crate::config::ServiceConfig;
use crate::pipeline::{ExtractInputs, JobContext, JobServices, PipelineEngine};
use crate::secrets::resolver::contains_vault_tokens;
use crate::secrets::TemplateResolver;
use crate::transform::StepRegistry;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tablift_types::{DatasetSpec, ExtractionKind, JobExecution};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use self::trigger::CronTrigger;
use tracing::{error, info, warn};

/// Group tag under which ingestion triggers register.
pub const TRIGGER_GROUP: &str = "DataIngestion";

/// Dispatcher tick resolution; cron is second-granular.
const TICK: Duration = Duration::from_millis(500);

/// Everything a worker needs to build and run one execution.
pub struct SchedulerDeps {
    pub config: Arc<ServiceConfig>,
    pub services: Arc<JobServices>,
    pub step_registry: StepRegistry,
    pub resolver: Option<Arc<TemplateResolver>>,
}

impl SchedulerDeps {
    /// Wire the production collaborators from the service configuration:
    /// real drivers, the configured upload providers, the built-in step
    /// registry, and the secret resolver when a store is configured.
    ///
    /// # Errors
    ///
    /// Returns an error when the secret store is misconfigured.
    pub fn from_config(config: Arc<ServiceConfig>) -> Result<Arc<Self>> {
        let services = Arc::new(JobServices {
            sources: Arc::new(crate::source::DriverFactory::default()),
            uploaders: Arc::new(crate::upload::ProviderFactory::new(
                config.uploads.fs.clone(),
                config.uploads.blob.clone(),
            )),
            environment: config.environment.clone(),
            clock: Arc::new(crate::clock::SystemClock),
        });
        let resolver = config.build_secret_store()?.map(|store| {
            Arc::new(TemplateResolver::new(
                store,
                Arc::new(crate::secrets::SecretCache::default()),
            ))
        });
        Ok(Arc::new(Self {
            config,
            services,
            step_registry: StepRegistry::builtin(),
            resolver,
        }))
    }
}

/// What happened to one trigger fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// A worker was spawned.
    Started,
    /// The previous execution of this dataset is still running.
    SkippedConcurrent,
    /// The dataset is disabled; the fire no-ops.
    SkippedDisabled,
    /// No trigger is registered under this dataset id.
    UnknownDataset,
}

struct Entry {
    spec: Arc<DatasetSpec>,
    trigger: CronTrigger,
    /// Held by the worker for the whole execution; `try_lock` enforces
    /// at-most-one per dataset.
    guard: Arc<tokio::sync::Mutex<()>>,
    fingerprint: u64,
}

/// The dispatcher loop and its trigger registry.
pub struct Scheduler {
    deps: Arc<SchedulerDeps>,
    cancel: CancellationToken,
    entries: HashMap<(String, String), Entry>,
    workers: JoinSet<()>,
}

impl Scheduler {
    pub fn new(deps: Arc<SchedulerDeps>, cancel: CancellationToken) -> Self {
        Self {
            deps,
            cancel,
            entries: HashMap::new(),
            workers: JoinSet::new(),
        }
    }

    /// Load every dataset spec and register triggers for the enabled ones.
    pub fn load_and_schedule(&mut self) {
        let specs = load_datasets(&self.deps.config.datasets_dir);
        info!(count = specs.len(), "Dataset specs loaded");
        for spec in specs {
            self.schedule_dataset(spec);
        }
    }

    /// Register (or re-register) one dataset's trigger.
    pub fn schedule_dataset(&mut self, spec: DatasetSpec) {
        let key = (spec.id.clone(), TRIGGER_GROUP.to_string());
        if !spec.enabled {
            if self.entries.remove(&key).is_some() {
                info!(dataset_id = %spec.id, "Unscheduled disabled dataset");
            } else {
                info!(dataset_id = %spec.id, "Dataset disabled; no trigger registered");
            }
            return;
        }

        let now = self.deps.services.clock.now_utc();
        let trigger = match CronTrigger::new(&spec.cron, now) {
            Ok(trigger) => trigger,
            Err(err) => {
                error!(dataset_id = %spec.id, error = %err, "Trigger not registered");
                return;
            }
        };

        let fingerprint = spec_fingerprint(&spec);
        // Replacing an existing registration keeps its guard so an active
        // execution stays exclusive across the reschedule.
        let guard = self
            .entries
            .remove(&key)
            .map_or_else(|| Arc::new(tokio::sync::Mutex::new(())), |old| old.guard);

        info!(
            dataset_id = %spec.id,
            cron = %spec.cron,
            next_fire = ?trigger.next_fire(),
            "Trigger registered"
        );
        self.entries.insert(
            key,
            Entry {
                spec: Arc::new(spec),
                trigger,
                guard,
                fingerprint,
            },
        );
    }

    /// Dataset ids with a registered trigger.
    pub fn scheduled_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().map(|(id, _)| id.clone()).collect();
        ids.sort();
        ids
    }

    /// Re-scan the datasets directory: additions scheduled, removals
    /// unscheduled, modifications rescheduled. Running executions finish.
    pub fn reload(&mut self) {
        let specs = load_datasets(&self.deps.config.datasets_dir);
        let fresh: HashMap<String, DatasetSpec> =
            specs.into_iter().map(|s| (s.id.clone(), s)).collect();

        let stale: Vec<(String, String)> = self
            .entries
            .keys()
            .filter(|(id, _)| !fresh.contains_key(id))
            .cloned()
            .collect();
        for key in stale {
            info!(dataset_id = %key.0, "Dataset removed; unscheduling");
            self.entries.remove(&key);
        }

        for (id, spec) in fresh {
            let key = (id.clone(), TRIGGER_GROUP.to_string());
            let unchanged = self
                .entries
                .get(&key)
                .is_some_and(|e| e.fingerprint == spec_fingerprint(&spec));
            if unchanged {
                continue;
            }
            self.schedule_dataset(spec);
        }
    }

    /// Fire one dataset immediately, honoring the exclusivity guard.
    pub fn fire_now(&mut self, dataset_id: &str) -> FireOutcome {
        let key = (dataset_id.to_string(), TRIGGER_GROUP.to_string());
        let Some(entry) = self.entries.get(&key) else {
            warn!(dataset_id, "Fire requested for unknown dataset");
            return FireOutcome::UnknownDataset;
        };
        if !entry.spec.enabled {
            warn!(dataset_id, "Fire for disabled dataset ignored");
            return FireOutcome::SkippedDisabled;
        }

        let Ok(permit) = Arc::clone(&entry.guard).try_lock_owned() else {
            warn!(
                dataset_id,
                "Skipping fire: previous execution still running"
            );
            return FireOutcome::SkippedConcurrent;
        };

        let deps = Arc::clone(&self.deps);
        let spec = Arc::clone(&entry.spec);
        let cancel = self.cancel.child_token();
        self.workers.spawn(async move {
            let _permit = permit;
            if let Err(err) = run_dataset_once(&deps, spec, cancel).await {
                error!(error = %err, "Execution could not be built");
            }
        });
        FireOutcome::Started
    }

    fn fire_due(&mut self, now: DateTime<Utc>) {
        let due: Vec<String> = self
            .entries
            .iter_mut()
            .filter_map(|((id, _), entry)| entry.trigger.fire_if_due(now).then(|| id.clone()))
            .collect();
        for dataset_id in due {
            self.fire_now(&dataset_id);
        }
    }

    /// Run the dispatcher loop until the cancellation token fires, then
    /// wait out the shutdown grace period for in-flight executions.
    pub async fn run(mut self) {
        self.load_and_schedule();

        let reload_enabled = self.deps.config.hot_reload.enabled;
        let poll = Duration::from_secs(self.deps.config.hot_reload.poll_interval_sec.max(1));
        let mut reload_timer =
            tokio::time::interval_at(tokio::time::Instant::now() + poll, poll);
        reload_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(datasets = self.entries.len(), "Scheduler loop started");
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(TICK) => {
                    let now = self.deps.services.clock.now_utc();
                    self.fire_due(now);
                }
                _ = reload_timer.tick(), if reload_enabled => {
                    self.reload();
                }
            }
        }

        info!("Scheduler stopping; waiting for in-flight executions");
        let grace = Duration::from_secs(self.deps.config.shutdown_grace_sec);
        let drained = tokio::time::timeout(grace, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                grace_secs = grace.as_secs(),
                "Grace period expired; abandoning remaining executions"
            );
            self.workers.abort_all();
        }
    }
}

/// Build and run one execution of `spec`, returning its terminal state.
///
/// # Errors
///
/// Returns an error when the job cannot even be built (unknown connection
/// key, unresolvable secrets, missing SQL file, unknown step type). A build
/// failure fails only this execution.
pub async fn run_dataset_once(
    deps: &SchedulerDeps,
    spec: Arc<DatasetSpec>,
    cancel: CancellationToken,
) -> Result<JobExecution> {
    let mut ctx = build_job_context(deps, spec, cancel).await?;
    PipelineEngine::standard().run(&mut ctx).await;
    Ok(ctx.execution)
}

/// Assemble the per-execution context: fresh execution id, resolved
/// connection string, query text, coerced parameters, rendered file name,
/// and the compiled transformation plan.
///
/// # Errors
///
/// See [`run_dataset_once`].
pub async fn build_job_context(
    deps: &SchedulerDeps,
    spec: Arc<DatasetSpec>,
    cancel: CancellationToken,
) -> Result<JobContext> {
    let now = deps.services.clock.now_utc();
    let execution_id = new_execution_id(&spec.id, now);

    let template = deps.config.connection_template(&spec.source.connection_key)?;
    let connection_string = match &deps.resolver {
        Some(resolver) => resolver
            .resolve(template, &cancel)
            .await
            .with_context(|| format!("resolving connection '{}'", spec.source.connection_key))?,
        None => {
            if contains_vault_tokens(template) {
                anyhow::bail!(
                    "connection '{}' uses vault placeholders but no secret store is configured",
                    spec.source.connection_key
                );
            }
            template.to_string()
        }
    };

    let query_reference = spec.source.query_reference()?;
    let query = if spec.source.extraction_kind == ExtractionKind::Query {
        let path = deps.config.datasets_dir.join(&query_reference);
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading SQL file {}", path.display()))?
    } else {
        query_reference
    };

    let parameters = parameters_to_list(&spec.source.parameters);
    let file_name = render::render_file_name(&spec.output.file_name_pattern, now);
    let plan = deps.step_registry.build_plan(&spec.transformations)?;

    let mut execution = JobExecution::new(execution_id, &spec.id, now);
    // Audit mirror of the stage inputs. The resolved connection string
    // stays out of the bag; only its key is recorded.
    execution.metadata.insert(
        "sourceType".into(),
        serde_json::json!(spec.source.kind.as_str()),
    );
    execution.metadata.insert(
        "connectionKey".into(),
        serde_json::json!(spec.source.connection_key),
    );
    execution.metadata.insert("query".into(), serde_json::json!(query));
    execution.metadata.insert(
        "parameters".into(),
        serde_json::json!(parameters
            .iter()
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>()),
    );
    execution
        .metadata
        .insert("fileName".into(), serde_json::json!(file_name));

    let command_timeout = Duration::from_secs(spec.source.effective_command_timeout_sec());
    Ok(JobContext {
        execution,
        inputs: ExtractInputs {
            source_kind: spec.source.kind,
            connection_string,
            query,
            parameters,
            command_timeout,
        },
        plan,
        file_name,
        dataset: spec,
        services: Arc::clone(&deps.services),
        cancel,
    })
}

/// `{datasetId}.{yyyyMMddHHmmss}-{8-hex}`: unique process-wide, sortable
/// and monotonic within a dataset.
fn new_execution_id(dataset_id: &str, now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{dataset_id}.{}-{}",
        now.format("%Y%m%d%H%M%S"),
        &suffix[..8]
    )
}
