//! Control-record sidecar emitted next to each packed artifact.
//!
//! The control record is a one-row RFC-4180 CSV describing the artifact:
//! row count, reference date, SHA-256 checksum, emission timestamp, dataset
//! name, and source family. Downstream loaders key their intake on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Literal header row of every control file.
pub const CONTROL_HEADER: &str = "RecordCount,RefDate,Checksum,Timestamp,DatasetName,Source";

/// Suffix of the control file name.
pub const CONTROL_EXTENSION: &str = "ctl";

/// Describes one packed artifact for downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRecord {
    pub record_count: u64,
    /// ISO-8601 UTC reference date of the extraction.
    pub ref_date: DateTime<Utc>,
    /// Lowercase hex SHA-256 of the packed artifact bytes.
    pub checksum: String,
    /// ISO-8601 UTC emission time.
    pub timestamp: DateTime<Utc>,
    /// `{datasetId}_{yyyyMMddHHmmss}`.
    pub dataset_name: String,
    /// Source family tag (`mssql`, `oracle`).
    pub source: String,
}

impl ControlRecord {
    /// File name of the sidecar: `{datasetName}.ctl`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.dataset_name, CONTROL_EXTENSION)
    }

    /// Render the record as UTF-8 CSV bytes: header row plus one data row.
    #[must_use]
    pub fn to_csv_bytes(&self) -> Vec<u8> {
        let fields = [
            self.record_count.to_string(),
            self.ref_date.to_rfc3339(),
            self.checksum.clone(),
            self.timestamp.to_rfc3339(),
            self.dataset_name.clone(),
            self.source.clone(),
        ];
        let row = fields
            .iter()
            .map(|f| escape_csv(f))
            .collect::<Vec<_>>()
            .join(",");
        format!("{CONTROL_HEADER}\n{row}\n").into_bytes()
    }
}

/// Quote a CSV field per RFC 4180.
///
/// Fields containing a comma, quote, CR, or LF are wrapped in double quotes
/// with embedded quotes doubled; everything else passes through untouched.
#[must_use]
pub fn escape_csv(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Invert [`escape_csv`] on a single field.
#[must_use]
pub fn unescape_csv(field: &str) -> String {
    let inner = field
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(field);
    inner.replace("\"\"", "\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> ControlRecord {
        ControlRecord {
            record_count: 3,
            ref_date: Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            checksum: "ab".repeat(32),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 5).unwrap(),
            dataset_name: "tr1_20240115000000".to_string(),
            source: "mssql".to_string(),
        }
    }

    #[test]
    fn file_name_appends_ctl() {
        assert_eq!(record().file_name(), "tr1_20240115000000.ctl");
    }

    #[test]
    fn csv_has_literal_header_and_one_row() {
        let text = String::from_utf8(record().to_csv_bytes()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(CONTROL_HEADER));
        let row = lines.next().unwrap();
        assert!(row.starts_with("3,2024-01-15T00:00:00+00:00,"));
        assert!(row.ends_with(",tr1_20240115000000,mssql"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn plain_fields_pass_through_escaping() {
        for s in ["", "plain", "tr1_20240115", "a b c"] {
            assert_eq!(escape_csv(s), s);
        }
    }

    #[test]
    fn special_fields_are_quoted_and_doubled() {
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn escape_roundtrips() {
        for s in ["plain", "a,b", "q\"q", "\r\n", "x,\"y\",z", ""] {
            assert_eq!(unescape_csv(&escape_csv(s)), s);
        }
    }
}
