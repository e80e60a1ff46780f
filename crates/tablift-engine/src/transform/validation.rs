//! Schema validation step.

use super::{TransformError, TransformStep};
use serde::Deserialize;
use tablift_types::{TabularData, TransformationSpec};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ValidationConfig {
    required_columns: Vec<String>,
    validate_email: bool,
}

/// Fails the execution when required columns are missing from the schema.
///
/// `validateEmail` is reserved for a future rule set; it is accepted and
/// ignored, and never drops rows.
pub struct DataValidationStep {
    environments: Vec<String>,
    config: ValidationConfig,
}

/// Registry builder.
pub(super) fn build(
    spec: &TransformationSpec,
) -> Result<Box<dyn TransformStep>, TransformError> {
    let config: ValidationConfig =
        serde_json::from_value(serde_json::Value::Object(spec.config.clone()))
            .map_err(|e| TransformError::Failed(format!("invalid DataValidation config: {e}")))?;
    Ok(Box::new(DataValidationStep {
        environments: spec.environments.clone(),
        config,
    }))
}

impl TransformStep for DataValidationStep {
    fn name(&self) -> &str {
        "DataValidation"
    }

    fn environments(&self) -> &[String] {
        &self.environments
    }

    fn transform(
        &self,
        table: TabularData,
        _cancel: &CancellationToken,
    ) -> Result<TabularData, TransformError> {
        let missing: Vec<&str> = self
            .config
            .required_columns
            .iter()
            .filter(|required| table.column_index(required).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(TransformError::Validation(format!(
                "required column(s) missing: {}",
                missing.join(", ")
            )));
        }

        if self.config.validate_email {
            tracing::debug!("validateEmail is reserved and currently a no-op");
        }

        Ok(table)
    }
}
