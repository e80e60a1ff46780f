//! Typed error taxonomy for pipeline executions.
//!
//! [`PipelineError`] carries the failing stage, a classification kind, a
//! severity tag, and an optional cause chain. Construct via kind-specific
//! factory methods (e.g. [`PipelineError::extraction`]). Severity drives the
//! engine's abort rule: any `Critical` error stops all later stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of an execution error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid service or dataset configuration.
    Config,
    /// Secret store rejected the credentials.
    Auth,
    /// Secret store transport failure (HTTP, TLS).
    Transport,
    /// Secret path resolved to nothing.
    NotFound,
    /// Database extraction failure.
    Extraction,
    /// Data validation failure inside a transformation step.
    Validation,
    /// Transformation step failure.
    Transform,
    /// Columnar serialization failure.
    Pack,
    /// Control record generation failure.
    Control,
    /// Artifact delivery failure.
    Upload,
    /// The execution's cancellation signal fired.
    Cancelled,
    /// Anything the other kinds do not cover.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Auth => "auth",
            Self::Transport => "transport",
            Self::NotFound => "not_found",
            Self::Extraction => "extraction",
            Self::Validation => "validation",
            Self::Transform => "transform",
            Self::Pack => "pack",
            Self::Control => "control",
            Self::Upload => "upload",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// How badly an error affects the execution.
///
/// `Critical` aborts every later stage. `Error` fails the execution without
/// poisoning the chain (Publish uses this). `Warning` is recorded only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A classified, stage-attributed execution error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{kind}] {stage}: {message}")]
pub struct PipelineError {
    pub stage: String,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub cause: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PipelineError {
    fn new(
        stage: impl Into<String>,
        kind: ErrorKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            kind,
            severity,
            message: message.into(),
            cause: None,
            timestamp: Utc::now(),
        }
    }

    /// Configuration error. Critical: the job was never buildable.
    #[must_use]
    pub fn config(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Config, Severity::Critical, message)
    }

    /// Secret-store authentication failure.
    #[must_use]
    pub fn auth(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Auth, Severity::Critical, message)
    }

    /// Secret-store transport failure.
    #[must_use]
    pub fn transport(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Transport, Severity::Critical, message)
    }

    /// Secret path not found.
    #[must_use]
    pub fn not_found(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::NotFound, Severity::Critical, message)
    }

    /// Extraction failure. Always critical.
    #[must_use]
    pub fn extraction(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Extraction, Severity::Critical, message)
    }

    /// Validation failure raised by a transformation step.
    #[must_use]
    pub fn validation(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Validation, Severity::Critical, message)
    }

    /// Transformation failure.
    #[must_use]
    pub fn transform(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Transform, Severity::Critical, message)
    }

    /// Columnar serialization failure.
    #[must_use]
    pub fn pack(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Pack, Severity::Critical, message)
    }

    /// Control-record failure.
    #[must_use]
    pub fn control(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Control, Severity::Critical, message)
    }

    /// Delivery failure. Severity `Error`: the execution fails but the
    /// taxonomy stays distinguishable from data-corruption criticals.
    #[must_use]
    pub fn upload(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Upload, Severity::Error, message)
    }

    /// The cancellation signal fired mid-stage.
    #[must_use]
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::new(
            stage,
            ErrorKind::Cancelled,
            Severity::Critical,
            "execution cancelled",
        )
    }

    /// Uncaught failure (panic boundary).
    #[must_use]
    pub fn internal(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(stage, ErrorKind::Internal, Severity::Critical, message)
    }

    /// Attach the underlying cause, preserved as text.
    #[must_use]
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Override the default severity for this kind.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_errors_are_critical() {
        let err = PipelineError::extraction("Extraction", "ORA-00942: table does not exist");
        assert_eq!(err.kind, ErrorKind::Extraction);
        assert!(err.is_critical());
        assert_eq!(err.stage, "Extraction");
    }

    #[test]
    fn upload_errors_are_non_critical() {
        let err = PipelineError::upload("Publish", "connection reset");
        assert_eq!(err.severity, Severity::Error);
        assert!(!err.is_critical());
    }

    #[test]
    fn cause_is_preserved_as_text() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = PipelineError::upload("Publish", "write failed").with_cause(&io);
        assert_eq!(err.cause.as_deref(), Some("denied"));
    }

    #[test]
    fn severity_ordering_puts_critical_last() {
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn display_includes_kind_stage_and_message() {
        let err = PipelineError::pack("Pack", "schema mismatch");
        assert_eq!(err.to_string(), "[pack] Pack: schema mismatch");
    }
}
