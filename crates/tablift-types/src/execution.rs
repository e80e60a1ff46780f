//! Per-run execution state shared across pipeline stages.
//!
//! A [`JobExecution`] is created for every trigger fire, owned exclusively
//! by that worker, and observed once by the scheduler after it reaches a
//! terminal state. Stages only read what strictly earlier stages wrote.

use crate::error::PipelineError;
use crate::table::TabularData;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;

/// Where an execution currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Extracting,
    Transforming,
    Packing,
    GeneratingControl,
    Publishing,
    Succeeded,
    Failed,
    Aborted,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Extracting => "extracting",
            Self::Transforming => "transforming",
            Self::Packing => "packing",
            Self::GeneratingControl => "generating_control",
            Self::Publishing => "publishing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// One concrete run of a dataset's pipeline.
#[derive(Debug, Clone)]
pub struct JobExecution {
    /// `{datasetId}.{yyyyMMddHHmmss}-{8-hex}`; unique process-wide and
    /// monotonic within a dataset.
    pub execution_id: String,
    pub dataset_id: String,
    pub start_time: DateTime<Utc>,
    pub state: ExecutionState,
    /// Untyped inputs mirrored for traceability; stages receive typed
    /// structs and this bag is the audit copy.
    pub metadata: HashMap<String, JsonValue>,
    pub extracted_table: Option<TabularData>,
    pub packed_bytes: Option<Vec<u8>>,
    pub control_bytes: Option<Vec<u8>>,
    pub control_file_name: Option<String>,
    pub published_uri: Option<String>,
    pub errors: Vec<PipelineError>,
}

impl JobExecution {
    pub fn new(
        execution_id: impl Into<String>,
        dataset_id: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            dataset_id: dataset_id.into(),
            start_time,
            state: ExecutionState::Extracting,
            metadata: HashMap::new(),
            extracted_table: None,
            packed_bytes: None,
            control_bytes: None,
            control_file_name: None,
            published_uri: None,
            errors: Vec::new(),
        }
    }

    pub fn record_error(&mut self, error: PipelineError) {
        self.errors.push(error);
    }

    /// Whether any recorded error carries `Critical` severity.
    pub fn has_critical_error(&self) -> bool {
        self.errors.iter().any(PipelineError::is_critical)
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

/// Outcome of one stage invocation.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub success: bool,
    pub message: Option<String>,
    /// Whether the engine may invoke the next stage.
    pub should_continue: bool,
    pub metrics: StageMetrics,
}

impl StageResult {
    pub fn ok(metrics: StageMetrics) -> Self {
        Self {
            success: true,
            message: None,
            should_continue: true,
            metrics,
        }
    }

    pub fn ok_with_message(metrics: StageMetrics, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            should_continue: true,
            metrics,
        }
    }

    pub fn failed(metrics: StageMetrics, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            should_continue: false,
            metrics,
        }
    }
}

/// Per-stage measurements surfaced in structured logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageMetrics {
    pub rows: Option<u64>,
    pub bytes: Option<u64>,
    pub elapsed_ms: u64,
}

impl StageMetrics {
    pub fn elapsed(elapsed_ms: u64) -> Self {
        Self {
            elapsed_ms,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_rows(mut self, rows: u64) -> Self {
        self.rows = Some(rows);
        self
    }

    #[must_use]
    pub fn with_bytes(mut self, bytes: u64) -> Self {
        self.bytes = Some(bytes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_execution_starts_extracting_with_empty_outputs() {
        let exec = JobExecution::new("d1.20240115000000-deadbeef", "d1", Utc::now());
        assert_eq!(exec.state, ExecutionState::Extracting);
        assert!(exec.extracted_table.is_none());
        assert!(exec.packed_bytes.is_none());
        assert!(exec.errors.is_empty());
        assert!(!exec.state.is_terminal());
    }

    #[test]
    fn critical_detection_scans_all_errors() {
        let mut exec = JobExecution::new("d1.x-y", "d1", Utc::now());
        exec.record_error(PipelineError::upload("Publish", "slow disk"));
        assert!(!exec.has_critical_error());
        exec.record_error(PipelineError::extraction("Extraction", "boom"));
        assert!(exec.has_critical_error());
        assert_eq!(exec.error_count(), 2);
    }

    #[test]
    fn terminal_states() {
        assert!(ExecutionState::Succeeded.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
        assert!(ExecutionState::Aborted.is_terminal());
        assert!(!ExecutionState::Publishing.is_terminal());
    }

    #[test]
    fn stage_result_constructors() {
        let ok = StageResult::ok(StageMetrics::elapsed(5).with_rows(3));
        assert!(ok.success && ok.should_continue);
        assert_eq!(ok.metrics.rows, Some(3));

        let failed = StageResult::failed(StageMetrics::default(), "no table");
        assert!(!failed.success && !failed.should_continue);
        assert_eq!(failed.message.as_deref(), Some("no table"));
    }
}
