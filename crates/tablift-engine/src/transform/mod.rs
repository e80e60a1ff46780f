//! Transformation step registry and execution engine.
//!
//! Steps register under their declared type name minus the trailing `Step`
//! token (`DataCleansingStep` → `DataCleansing`). The registry is seeded
//! once at startup and read lock-free afterwards. A job's transformation
//! chain is compiled into a [`TransformPlan`] before the job runs, so an
//! unknown step name fails the build, never a running execution.

pub mod cleansing;
pub mod validation;

use std::collections::HashMap;
use tablift_types::{TabularData, TransformationSpec};
use tokio_util::sync::CancellationToken;

pub use cleansing::DataCleansingStep;
pub use validation::DataValidationStep;

/// Failure modes of a transformation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("transformation failed: {0}")]
    Failed(String),
    #[error("transformation cancelled")]
    Cancelled,
}

/// One transformation applied to an extracted table.
pub trait TransformStep: Send + Sync {
    /// Display name used in logs.
    fn name(&self) -> &str;

    /// Environment tags this step runs in; empty means all.
    fn environments(&self) -> &[String];

    /// Transform the table. Row count must be preserved unless the step's
    /// documented behavior says otherwise.
    fn transform(
        &self,
        table: TabularData,
        cancel: &CancellationToken,
    ) -> Result<TabularData, TransformError>;
}

/// Builds a step instance from its dataset-spec entry.
pub type StepBuilder = fn(&TransformationSpec) -> Result<Box<dyn TransformStep>, TransformError>;

/// Static step-type table, immutable after startup.
pub struct StepRegistry {
    builders: HashMap<String, StepBuilder>,
}

impl StepRegistry {
    pub fn empty() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// The registry with every built-in step type.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("DataCleansingStep", cleansing::build);
        registry.register("DataValidationStep", validation::build);
        registry
    }

    /// Register a step type under its declared name minus the trailing
    /// `Step` token. First registration wins; duplicates log at WARN and
    /// are skipped.
    pub fn register(&mut self, declared_name: &str, builder: StepBuilder) {
        let name = declared_name
            .strip_suffix("Step")
            .filter(|stripped| !stripped.is_empty())
            .unwrap_or(declared_name);
        if self.builders.contains_key(name) {
            tracing::warn!(step = name, "Duplicate step registration skipped");
            return;
        }
        self.builders.insert(name.to_string(), builder);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// Compile a dataset's transformation chain.
    ///
    /// Disabled entries are dropped; the rest sort by ascending `order`
    /// with declaration order breaking ties.
    ///
    /// # Errors
    ///
    /// Fails on the first step type with no registration, before the job
    /// ever runs.
    pub fn build_plan(&self, specs: &[TransformationSpec]) -> anyhow::Result<TransformPlan> {
        let mut steps = Vec::new();
        for spec in specs.iter().filter(|s| s.enabled) {
            let builder = self.builders.get(&spec.step_type).ok_or_else(|| {
                anyhow::anyhow!("no registered transformation step named '{}'", spec.step_type)
            })?;
            let step = builder(spec)
                .map_err(|e| anyhow::anyhow!("step '{}' failed to build: {e}", spec.step_type))?;
            steps.push(PlannedStep {
                step,
                order: spec.order,
            });
        }
        // Stable sort keeps declaration order for equal `order` values.
        steps.sort_by_key(|s| s.order);
        Ok(TransformPlan { steps })
    }
}

struct PlannedStep {
    step: Box<dyn TransformStep>,
    order: i32,
}

impl std::fmt::Debug for PlannedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedStep")
            .field("step", &self.step.name())
            .field("order", &self.order)
            .finish()
    }
}

/// A compiled, ordered transformation chain.
#[derive(Debug)]
pub struct TransformPlan {
    steps: Vec<PlannedStep>,
}

impl TransformPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Apply the chain to a deep copy of `table`.
    ///
    /// Steps whose environment set is non-empty and does not contain
    /// `environment` are skipped with an INFO log. Returns the transformed
    /// table and the names of the steps that actually ran, in order.
    ///
    /// # Errors
    ///
    /// Propagates the first step failure; cancellation between steps maps
    /// to [`TransformError::Cancelled`].
    pub fn apply(
        &self,
        table: &TabularData,
        environment: &str,
        cancel: &CancellationToken,
    ) -> Result<(TabularData, Vec<String>), TransformError> {
        let mut current = table.clone();
        let mut applied = Vec::new();

        for planned in &self.steps {
            if cancel.is_cancelled() {
                return Err(TransformError::Cancelled);
            }

            let environments = planned.step.environments();
            if !environments.is_empty() && !environments.iter().any(|e| e == environment) {
                tracing::info!(
                    step = planned.step.name(),
                    environment,
                    "Skipping step gated to other environments"
                );
                continue;
            }

            tracing::debug!(step = planned.step.name(), order = planned.order, "Applying step");
            current = planned.step.transform(current, cancel)?;
            applied.push(planned.step.name().to_string());
        }

        Ok((current, applied))
    }
}
