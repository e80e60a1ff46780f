//! Dataset specification files.
//!
//! One `dataset-*.json` file describes one recurring ingestion flow: where
//! to extract from, how to transform, how to pack, and where to deliver.
//! Enum-valued fields parse case-insensitively and unknown fields are
//! ignored so newer files keep loading on older services.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::fmt;

/// Database family of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Stored-procedure family (SQL Server, tiberius driver).
    Mssql,
    /// Output-cursor family (Oracle, `p_cursor` ref-cursor pattern).
    Oracle,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mssql => "mssql",
            Self::Oracle => "oracle",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SourceKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "mssql" | "sqlserver" | "rela" => Ok(Self::Mssql),
            "oracle" | "relb" => Ok(Self::Oracle),
            other => Err(de::Error::custom(format!("unknown source kind '{other}'"))),
        }
    }
}

impl Serialize for SourceKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// How the extraction query is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionKind {
    /// A bare stored-procedure name.
    Procedure,
    /// A package-qualified procedure (`package.procedure`).
    Package,
    /// Raw SQL text loaded from a file on disk.
    Query,
}

impl<'de> Deserialize<'de> for ExtractionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "procedure" => Ok(Self::Procedure),
            "package" => Ok(Self::Package),
            "query" => Ok(Self::Query),
            other => Err(de::Error::custom(format!(
                "unknown extraction kind '{other}'"
            ))),
        }
    }
}

impl Serialize for ExtractionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            Self::Procedure => "procedure",
            Self::Package => "package",
            Self::Query => "query",
        };
        serializer.serialize_str(s)
    }
}

/// Parquet compression codec for packed artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionCodec {
    #[default]
    Snappy,
    Zstd,
    Gzip,
    Uncompressed,
}

impl<'de> Deserialize<'de> for CompressionCodec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.to_ascii_lowercase().as_str() {
            "snappy" => Ok(Self::Snappy),
            "zstd" => Ok(Self::Zstd),
            "gzip" => Ok(Self::Gzip),
            "none" | "uncompressed" => Ok(Self::Uncompressed),
            other => Err(de::Error::custom(format!(
                "unknown compression codec '{other}'"
            ))),
        }
    }
}

impl Serialize for CompressionCodec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            Self::Snappy => "snappy",
            Self::Zstd => "zstd",
            Self::Gzip => "gzip",
            Self::Uncompressed => "none",
        };
        serializer.serialize_str(s)
    }
}

/// Where the extraction runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    pub kind: SourceKind,
    /// Name of a connection template in the service configuration.
    pub connection_key: String,
    pub extraction_kind: ExtractionKind,
    #[serde(default)]
    pub procedure: Option<String>,
    /// Package name; meaningful only for [`ExtractionKind::Package`].
    #[serde(default)]
    pub package: Option<String>,
    /// SQL file path; meaningful only for [`ExtractionKind::Query`].
    #[serde(default)]
    pub sql_file: Option<String>,
    /// Ordered parameter map; order is preserved from the JSON document.
    #[serde(default)]
    pub parameters: serde_json::Map<String, JsonValue>,
    /// Override of the driver's command timeout, in seconds.
    #[serde(default)]
    pub command_timeout_sec: Option<u64>,
}

impl SourceSpec {
    /// Effective command timeout in seconds.
    ///
    /// Cursor-style drivers default to 600, the rest to 300; datasets may
    /// override either way.
    pub fn effective_command_timeout_sec(&self) -> u64 {
        self.command_timeout_sec.unwrap_or(match self.kind {
            SourceKind::Oracle => 600,
            SourceKind::Mssql => 300,
        })
    }

    /// The query reference handed to the driver, before any file loading.
    ///
    /// # Errors
    ///
    /// Returns an error when the field required by `extraction_kind` is
    /// absent.
    pub fn query_reference(&self) -> anyhow::Result<String> {
        match self.extraction_kind {
            ExtractionKind::Procedure => self
                .procedure
                .clone()
                .ok_or_else(|| anyhow::anyhow!("extractionKind 'procedure' requires 'procedure'")),
            ExtractionKind::Package => {
                let package = self
                    .package
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("extractionKind 'package' requires 'package'"))?;
                let procedure = self.procedure.as_deref().ok_or_else(|| {
                    anyhow::anyhow!("extractionKind 'package' requires 'procedure'")
                })?;
                Ok(format!("{package}.{procedure}"))
            }
            ExtractionKind::Query => self
                .sql_file
                .clone()
                .ok_or_else(|| anyhow::anyhow!("extractionKind 'query' requires 'sqlFile'")),
        }
    }
}

/// One transformation step in a dataset's chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationSpec {
    /// Registered step type name (e.g. `DataCleansing`).
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub order: i32,
    /// Environment tags this step runs in; empty means all.
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub config: serde_json::Map<String, JsonValue>,
}

fn default_true() -> bool {
    true
}

/// Shape of the packed artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    /// File name pattern with `{date:yyyyMMdd}` / `{time:HHmmss}` /
    /// `{date}` / `{time}` substitutions.
    pub file_name_pattern: String,
    #[serde(default)]
    pub compression: CompressionCodec,
    /// Row-group size hint for the columnar writer.
    #[serde(default)]
    pub row_group_size: Option<usize>,
}

/// Where artifacts are delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationSpec {
    /// Upload provider tag: `fs` or `blob` (case-insensitive).
    #[serde(deserialize_with = "lowercase_string")]
    pub provider: String,
    /// Path (or key prefix) below the provider's base location.
    #[serde(default)]
    pub path: String,
    /// Provider-specific settings (e.g. a per-dataset container name).
    #[serde(default)]
    pub options: serde_json::Map<String, JsonValue>,
}

fn lowercase_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(String::deserialize(deserializer)?.to_ascii_lowercase())
}

/// A declarative recipe for one recurring ingestion flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSpec {
    pub id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 7-field Quartz-style cron expression.
    pub cron: String,
    pub source: SourceSpec,
    #[serde(default)]
    pub transformations: Vec<TransformationSpec>,
    pub output: OutputSpec,
    pub destination: DestinationSpec,
    #[serde(default)]
    pub keep_local_copy: bool,
    #[serde(default)]
    pub local_copy_path: Option<String>,
}

impl DatasetSpec {
    /// Structural checks beyond what serde enforces.
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.trim().is_empty() {
            anyhow::bail!("dataset id must not be empty");
        }
        self.source.query_reference()?;
        if self.keep_local_copy && self.local_copy_path.is_none() {
            anyhow::bail!("keepLocalCopy requires localCopyPath");
        }
        match self.destination.provider.as_str() {
            "fs" | "blob" => Ok(()),
            other => anyhow::bail!("unknown destination provider '{other}'"),
        }
    }
}
