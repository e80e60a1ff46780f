//! String-column cleansing step.

use super::{TransformError, TransformStep};
use serde::Deserialize;
use tablift_types::{LogicalType, TabularData, TransformationSpec, Value};
use tokio_util::sync::CancellationToken;

/// Rows between cancellation checks in the inner loop.
const CANCEL_CHECK_INTERVAL: usize = 4096;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CleansingConfig {
    trim_whitespace: bool,
    remove_empty_strings: bool,
}

impl Default for CleansingConfig {
    fn default() -> Self {
        Self {
            trim_whitespace: true,
            remove_empty_strings: false,
        }
    }
}

/// Trims ASCII whitespace on string columns and optionally nulls out
/// strings that are empty after trimming. Non-string columns pass through
/// untouched; the row count never changes.
pub struct DataCleansingStep {
    environments: Vec<String>,
    config: CleansingConfig,
}

/// Registry builder.
pub(super) fn build(
    spec: &TransformationSpec,
) -> Result<Box<dyn TransformStep>, TransformError> {
    let config: CleansingConfig =
        serde_json::from_value(serde_json::Value::Object(spec.config.clone()))
            .map_err(|e| TransformError::Failed(format!("invalid DataCleansing config: {e}")))?;
    Ok(Box::new(DataCleansingStep {
        environments: spec.environments.clone(),
        config,
    }))
}

impl TransformStep for DataCleansingStep {
    fn name(&self) -> &str {
        "DataCleansing"
    }

    fn environments(&self) -> &[String] {
        &self.environments
    }

    fn transform(
        &self,
        mut table: TabularData,
        cancel: &CancellationToken,
    ) -> Result<TabularData, TransformError> {
        let string_columns: Vec<usize> = table
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.logical_type == LogicalType::String)
            .map(|(idx, _)| idx)
            .collect();
        if string_columns.is_empty() || (!self.config.trim_whitespace && !self.config.remove_empty_strings)
        {
            return Ok(table);
        }

        for (row_idx, row) in table.rows.iter_mut().enumerate() {
            if row_idx % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Err(TransformError::Cancelled);
            }
            for &col_idx in &string_columns {
                let cell = &mut row[col_idx];
                if let Value::Text(text) = cell {
                    let trimmed = if self.config.trim_whitespace {
                        text.trim_matches(|c: char| c.is_ascii_whitespace())
                    } else {
                        text.as_str()
                    };
                    if self.config.remove_empty_strings && trimmed.is_empty() {
                        *cell = Value::Null;
                    } else if trimmed.len() != text.len() {
                        *cell = Value::Text(trimmed.to_string());
                    }
                }
            }
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablift_types::ColumnDef;

    fn step(config: serde_json::Value) -> Box<dyn TransformStep> {
        let spec: TransformationSpec = serde_json::from_value(serde_json::json!({
            "type": "DataCleansing",
            "config": config,
        }))
        .unwrap();
        build(&spec).unwrap()
    }

    fn table(cells: &[Value]) -> TabularData {
        let mut table = TabularData::new(vec![
            ColumnDef::new("name", LogicalType::String, true),
            ColumnDef::new("count", LogicalType::Int64, true),
        ]);
        for cell in cells {
            table
                .push_row(vec![cell.clone(), Value::Int64(7)])
                .unwrap();
        }
        table
    }

    #[test]
    fn trims_ascii_whitespace_by_default() {
        let input = table(&[Value::Text("  padded \t".into())]);
        let out = step(serde_json::json!({}))
            .transform(input, &CancellationToken::new())
            .unwrap();
        assert_eq!(out.rows[0][0], Value::Text("padded".into()));
        assert_eq!(out.rows[0][1], Value::Int64(7));
    }

    #[test]
    fn empty_strings_survive_unless_removal_enabled() {
        let input = table(&[Value::Text("   ".into())]);
        let kept = step(serde_json::json!({}))
            .transform(input.clone(), &CancellationToken::new())
            .unwrap();
        assert_eq!(kept.rows[0][0], Value::Text(String::new()));

        let removed = step(serde_json::json!({"removeEmptyStrings": true}))
            .transform(input, &CancellationToken::new())
            .unwrap();
        assert_eq!(removed.rows[0][0], Value::Null);
    }

    #[test]
    fn trimming_can_be_disabled() {
        let input = table(&[Value::Text(" x ".into())]);
        let out = step(serde_json::json!({"trimWhitespace": false}))
            .transform(input, &CancellationToken::new())
            .unwrap();
        assert_eq!(out.rows[0][0], Value::Text(" x ".into()));
    }

    #[test]
    fn nulls_and_row_count_are_preserved() {
        let input = table(&[Value::Null, Value::Text(" a ".into())]);
        let out = step(serde_json::json!({"removeEmptyStrings": true}))
            .transform(input, &CancellationToken::new())
            .unwrap();
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.rows[0][0], Value::Null);
        assert_eq!(out.rows[1][0], Value::Text("a".into()));
    }

    #[test]
    fn non_ascii_whitespace_is_not_trimmed() {
        let input = table(&[Value::Text("\u{00a0}x\u{00a0}".into())]);
        let out = step(serde_json::json!({}))
            .transform(input, &CancellationToken::new())
            .unwrap();
        assert_eq!(out.rows[0][0], Value::Text("\u{00a0}x\u{00a0}".into()));
    }
}
