//! The five standard stages.

use super::{JobContext, Stage};
use crate::pack;
use crate::source::{ExtractError, ExtractRequest};
use crate::transform::TransformError;
use crate::upload::UploadProvider;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tablift_types::{
    ControlRecord, ExecutionState, PipelineError, StageMetrics, StageResult,
};
use tracing::{error, warn};

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// --------------------------------------------------------------------------
// 1. Extract
// --------------------------------------------------------------------------

/// Runs the dataset's extraction through the driver for its source family.
pub struct ExtractStage;

#[async_trait]
impl Stage for ExtractStage {
    fn name(&self) -> &'static str {
        "Extraction"
    }

    fn state(&self) -> ExecutionState {
        ExecutionState::Extracting
    }

    async fn execute(&self, ctx: &mut JobContext) -> StageResult {
        let started = Instant::now();
        let driver = ctx.services.sources.create(ctx.inputs.source_kind);
        let request = ExtractRequest {
            connection_string: ctx.inputs.connection_string.clone(),
            query: ctx.inputs.query.clone(),
            parameters: ctx.inputs.parameters.clone(),
            command_timeout: ctx.inputs.command_timeout,
        };

        match driver.extract(&request, &ctx.cancel).await {
            Ok(table) => {
                let rows = table.row_count() as u64;
                ctx.execution.extracted_table = Some(table);
                StageResult::ok(StageMetrics::elapsed(elapsed_ms(started)).with_rows(rows))
            }
            Err(err) => {
                let pipeline_err = match &err {
                    ExtractError::Cancelled => PipelineError::cancelled(self.name()),
                    other => PipelineError::extraction(self.name(), other.to_string()),
                };
                ctx.execution.record_error(pipeline_err);
                StageResult::failed(StageMetrics::elapsed(elapsed_ms(started)), err.to_string())
            }
        }
    }
}

// --------------------------------------------------------------------------
// 2. Transform
// --------------------------------------------------------------------------

/// Applies the compiled transformation chain to a copy of the table.
pub struct TransformStage;

#[async_trait]
impl Stage for TransformStage {
    fn name(&self) -> &'static str {
        "Transformation"
    }

    fn state(&self) -> ExecutionState {
        ExecutionState::Transforming
    }

    async fn execute(&self, ctx: &mut JobContext) -> StageResult {
        let started = Instant::now();
        let Some(table) = &ctx.execution.extracted_table else {
            warn!(
                execution_id = %ctx.execution.execution_id,
                "No extracted table; transformation is a no-op"
            );
            return StageResult::ok_with_message(
                StageMetrics::elapsed(elapsed_ms(started)),
                "no extracted table",
            );
        };
        if table.is_empty() {
            warn!(
                execution_id = %ctx.execution.execution_id,
                "Extracted table is empty; skipping transformations"
            );
            return StageResult::ok_with_message(
                StageMetrics::elapsed(elapsed_ms(started)).with_rows(0),
                "empty extraction",
            );
        }

        match ctx
            .plan
            .apply(table, &ctx.services.environment, &ctx.cancel)
        {
            Ok((transformed, applied)) => {
                let rows = transformed.row_count() as u64;
                ctx.execution.extracted_table = Some(transformed);
                StageResult::ok_with_message(
                    StageMetrics::elapsed(elapsed_ms(started)).with_rows(rows),
                    format!("applied: [{}]", applied.join(", ")),
                )
            }
            Err(err) => {
                let pipeline_err = match &err {
                    TransformError::Validation(m) => PipelineError::validation(self.name(), m),
                    TransformError::Cancelled => PipelineError::cancelled(self.name()),
                    TransformError::Failed(m) => PipelineError::transform(self.name(), m),
                };
                ctx.execution.record_error(pipeline_err);
                StageResult::failed(StageMetrics::elapsed(elapsed_ms(started)), err.to_string())
            }
        }
    }
}

// --------------------------------------------------------------------------
// 3. Pack
// --------------------------------------------------------------------------

/// Serializes the table into the columnar artifact.
pub struct PackStage;

#[async_trait]
impl Stage for PackStage {
    fn name(&self) -> &'static str {
        "Packing"
    }

    fn state(&self) -> ExecutionState {
        ExecutionState::Packing
    }

    async fn execute(&self, ctx: &mut JobContext) -> StageResult {
        let started = Instant::now();
        let Some(table) = &ctx.execution.extracted_table else {
            ctx.execution
                .record_error(PipelineError::pack(self.name(), "no extracted table to pack"));
            return StageResult::failed(
                StageMetrics::elapsed(elapsed_ms(started)),
                "no extracted table to pack",
            );
        };

        match pack::write_table(table, &ctx.dataset.output) {
            Ok(bytes) => {
                let size = bytes.len() as u64;
                let rows = table.row_count() as u64;
                ctx.execution.packed_bytes = Some(bytes);
                StageResult::ok(
                    StageMetrics::elapsed(elapsed_ms(started))
                        .with_rows(rows)
                        .with_bytes(size),
                )
            }
            Err(err) => {
                ctx.execution
                    .record_error(PipelineError::pack(self.name(), err.to_string()));
                StageResult::failed(StageMetrics::elapsed(elapsed_ms(started)), err.to_string())
            }
        }
    }
}

// --------------------------------------------------------------------------
// 4. GenerateControl
// --------------------------------------------------------------------------

/// Builds the CSV control record over the packed artifact.
pub struct GenerateControlStage;

#[async_trait]
impl Stage for GenerateControlStage {
    fn name(&self) -> &'static str {
        "GenerateControl"
    }

    fn state(&self) -> ExecutionState {
        ExecutionState::GeneratingControl
    }

    async fn execute(&self, ctx: &mut JobContext) -> StageResult {
        let started = Instant::now();
        let Some(packed) = &ctx.execution.packed_bytes else {
            ctx.execution.record_error(PipelineError::control(
                self.name(),
                "no packed artifact to describe",
            ));
            return StageResult::failed(
                StageMetrics::elapsed(elapsed_ms(started)),
                "no packed artifact to describe",
            );
        };

        let checksum = hex::encode(Sha256::digest(packed));
        let record_count = ctx
            .execution
            .extracted_table
            .as_ref()
            .map_or(0, |t| t.row_count() as u64);
        let record = ControlRecord {
            record_count,
            ref_date: ctx.execution.start_time,
            checksum,
            timestamp: ctx.services.clock.now_utc(),
            dataset_name: format!(
                "{}_{}",
                ctx.execution.dataset_id,
                ctx.execution.start_time.format("%Y%m%d%H%M%S")
            ),
            source: ctx.inputs.source_kind.as_str().to_string(),
        };

        let bytes = record.to_csv_bytes();
        let size = bytes.len() as u64;
        ctx.execution.control_file_name = Some(record.file_name());
        ctx.execution.control_bytes = Some(bytes);
        StageResult::ok(
            StageMetrics::elapsed(elapsed_ms(started))
                .with_rows(record_count)
                .with_bytes(size),
        )
    }
}

// --------------------------------------------------------------------------
// 5. Publish
// --------------------------------------------------------------------------

/// Delivers the artifact and its control record through one provider.
pub struct PublishStage;

impl PublishStage {
    async fn deliver(
        provider: &Arc<dyn UploadProvider>,
        ctx: &mut JobContext,
    ) -> Result<(String, u64), PipelineError> {
        let packed = ctx
            .execution
            .packed_bytes
            .as_deref()
            .ok_or_else(|| PipelineError::upload("Publish", "no packed artifact to publish"))?;
        let control = ctx
            .execution
            .control_bytes
            .as_deref()
            .ok_or_else(|| PipelineError::upload("Publish", "no control record to publish"))?;
        let control_name = ctx
            .execution
            .control_file_name
            .clone()
            .ok_or_else(|| PipelineError::upload("Publish", "control file name missing"))?;

        // Ordering contract: artifact first, then control record.
        let artifact_receipt = provider
            .upload(&ctx.dataset.destination.path, &ctx.file_name, packed, &ctx.cancel)
            .await
            .map_err(|e| PipelineError::upload("Publish", e.to_string()))?;
        let control_receipt = provider
            .upload(&ctx.dataset.destination.path, &control_name, control, &ctx.cancel)
            .await
            .map_err(|e| PipelineError::upload("Publish", e.to_string()))?;

        Ok((
            artifact_receipt.path,
            artifact_receipt.bytes_written + control_receipt.bytes_written,
        ))
    }

    /// Best-effort local copies; failures log at ERROR and never fail the
    /// execution.
    async fn keep_local_copy(ctx: &JobContext) {
        let Some(local_dir) = ctx.dataset.local_copy_path.as_deref() else {
            return;
        };
        let dir = PathBuf::from(local_dir);
        if let Err(err) = tokio::fs::create_dir_all(&dir).await {
            error!(path = %dir.display(), error = %err, "Local copy directory creation failed");
            return;
        }

        let pairs = [
            (ctx.execution.packed_bytes.as_deref(), Some(ctx.file_name.clone())),
            (
                ctx.execution.control_bytes.as_deref(),
                ctx.execution.control_file_name.clone(),
            ),
        ];
        for (bytes, name) in pairs {
            let (Some(bytes), Some(name)) = (bytes, name) else {
                continue;
            };
            if let Err(err) = tokio::fs::write(dir.join(&name), bytes).await {
                error!(file = %name, error = %err, "Local copy write failed");
            }
        }
    }
}

#[async_trait]
impl Stage for PublishStage {
    fn name(&self) -> &'static str {
        "Publish"
    }

    fn state(&self) -> ExecutionState {
        ExecutionState::Publishing
    }

    async fn execute(&self, ctx: &mut JobContext) -> StageResult {
        let started = Instant::now();
        let provider = match ctx.services.uploaders.create(&ctx.dataset.destination) {
            Ok(provider) => provider,
            Err(err) => {
                ctx.execution
                    .record_error(PipelineError::upload(self.name(), err.to_string()));
                return StageResult::failed(
                    StageMetrics::elapsed(elapsed_ms(started)),
                    err.to_string(),
                );
            }
        };

        match Self::deliver(&provider, ctx).await {
            Ok((uri, bytes)) => {
                ctx.execution.published_uri = Some(uri);
                if ctx.dataset.keep_local_copy {
                    Self::keep_local_copy(ctx).await;
                }
                StageResult::ok(StageMetrics::elapsed(elapsed_ms(started)).with_bytes(bytes))
            }
            Err(err) => {
                let message = err.message.clone();
                ctx.execution.record_error(err);
                StageResult::failed(StageMetrics::elapsed(elapsed_ms(started)), message)
            }
        }
    }
}
