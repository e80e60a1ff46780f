//! Five-stage execution pipeline.
//!
//! The engine iterates a fixed array of stages (Extract, Transform, Pack,
//! GenerateControl, Publish) over one [`JobContext`]. Before each stage it
//! checks for a prior `Critical` error and for cancellation; every stage
//! call sits inside a panic boundary, so an uncaught failure is recorded as
//! `Critical` under the stage's name and the chain stops.
//!
//! Terminal-state mapping: cancellation ⇒ `Aborted`, any recorded error ⇒
//! `Failed`, otherwise `Succeeded`. Exactly one structured completion event
//! is emitted per execution.

pub mod stages;

use crate::clock::SharedClock;
use crate::source::DataSourceFactory;
use crate::transform::TransformPlan;
use crate::upload::UploadProviderFactory;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tablift_types::scalar::ParameterList;
use tablift_types::{
    DatasetSpec, ExecutionState, JobExecution, PipelineError, SourceKind, StageResult,
};
use tokio_util::sync::CancellationToken;

/// Typed inputs the Extract stage consumes.
///
/// The same values (minus the resolved connection string) are mirrored into
/// the execution's metadata bag for traceability.
#[derive(Debug, Clone)]
pub struct ExtractInputs {
    pub source_kind: SourceKind,
    pub connection_string: String,
    pub query: String,
    pub parameters: ParameterList,
    pub command_timeout: std::time::Duration,
}

/// Collaborators shared by every stage of one execution.
pub struct JobServices {
    pub sources: Arc<dyn DataSourceFactory>,
    pub uploaders: Arc<dyn UploadProviderFactory>,
    /// Current environment tag (e.g. `Production`), gates transformations.
    pub environment: String,
    pub clock: SharedClock,
}

/// Everything one execution owns.
pub struct JobContext {
    pub execution: JobExecution,
    pub dataset: Arc<DatasetSpec>,
    pub inputs: ExtractInputs,
    pub plan: TransformPlan,
    /// Rendered artifact file name (pattern substitutions applied).
    pub file_name: String,
    pub services: Arc<JobServices>,
    pub cancel: CancellationToken,
}

/// One step of the chain.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// The lifecycle state an execution is in while this stage runs.
    fn state(&self) -> ExecutionState;

    async fn execute(&self, ctx: &mut JobContext) -> StageResult;
}

/// The engine over a fixed stage array.
pub struct PipelineEngine {
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineEngine {
    /// The standard five-stage chain.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            stages: vec![
                Box::new(stages::ExtractStage),
                Box::new(stages::TransformStage),
                Box::new(stages::PackStage),
                Box::new(stages::GenerateControlStage),
                Box::new(stages::PublishStage),
            ],
        }
    }

    /// Run the chain to a terminal state and emit the completion event.
    pub async fn run(&self, ctx: &mut JobContext) -> ExecutionState {
        let started = Instant::now();

        for stage in &self.stages {
            if ctx.execution.has_critical_error() {
                tracing::warn!(
                    execution_id = %ctx.execution.execution_id,
                    stage = stage.name(),
                    "Aborting chain: earlier stage recorded a critical error"
                );
                ctx.execution.state = ExecutionState::Aborted;
                break;
            }
            if ctx.cancel.is_cancelled() {
                ctx.execution
                    .record_error(PipelineError::cancelled(stage.name()));
                break;
            }

            ctx.execution.state = stage.state();
            let outcome = AssertUnwindSafe(stage.execute(ctx)).catch_unwind().await;
            match outcome {
                Ok(result) => {
                    tracing::info!(
                        execution_id = %ctx.execution.execution_id,
                        stage = stage.name(),
                        success = result.success,
                        rows = result.metrics.rows,
                        bytes = result.metrics.bytes,
                        elapsed_ms = result.metrics.elapsed_ms,
                        message = result.message.as_deref(),
                        "Stage completed"
                    );
                    if !result.should_continue {
                        break;
                    }
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(
                        execution_id = %ctx.execution.execution_id,
                        stage = stage.name(),
                        "Stage panicked: {message}"
                    );
                    ctx.execution
                        .record_error(PipelineError::internal(stage.name(), message));
                    break;
                }
            }
        }

        let state = if ctx.cancel.is_cancelled() {
            ExecutionState::Aborted
        } else if ctx.execution.errors.is_empty() {
            ExecutionState::Succeeded
        } else {
            ExecutionState::Failed
        };
        ctx.execution.state = state;

        tracing::info!(
            dataset_id = %ctx.execution.dataset_id,
            execution_id = %ctx.execution.execution_id,
            outcome = %state,
            duration_secs = started.elapsed().as_secs_f64(),
            error_count = ctx.execution.error_count(),
            published_uri = ctx.execution.published_uri.as_deref(),
            "Execution completed"
        );
        state
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "stage panicked".to_string()
    }
}
