//! Dataset specification loading.
//!
//! Every `dataset-*.json` file under the configured directory is parsed to
//! a [`DatasetSpec`]. A file that fails to parse or validate is logged and
//! skipped; the rest still load. The file name carries no meaning; the
//! `id` field inside determines identity.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use tablift_types::scalar::ParameterList;
use tablift_types::{DatasetSpec, ScalarValue};
use tracing::{debug, error, warn};

/// Whether a file name matches the `dataset-*.json` pattern.
pub fn is_dataset_file(name: &str) -> bool {
    name.starts_with("dataset-") && name.ends_with(".json") && name.len() > "dataset-.json".len()
}

/// Load every valid dataset spec under `dir`, sorted by file name.
///
/// A missing or unreadable directory logs a warning and yields an empty
/// list, and the service still starts with an empty schedule.
pub fn load_datasets(dir: &Path) -> Vec<DatasetSpec> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                dir = %dir.display(),
                error = %err,
                "Datasets directory unreadable; starting with an empty schedule"
            );
            return Vec::new();
        }
    };

    let mut paths: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(is_dataset_file)
        })
        .collect();
    paths.sort();

    let mut specs = Vec::new();
    for path in paths {
        match load_one(&path) {
            Ok(spec) => {
                debug!(file = %path.display(), dataset_id = %spec.id, "Loaded dataset spec");
                specs.push(spec);
            }
            Err(err) => {
                error!(file = %path.display(), error = %err, "Skipping invalid dataset spec");
            }
        }
    }
    specs
}

fn load_one(path: &Path) -> anyhow::Result<DatasetSpec> {
    let raw = std::fs::read_to_string(path)?;
    let spec: DatasetSpec = serde_json::from_str(&raw)?;
    spec.validate()?;
    Ok(spec)
}

/// Coerce a dataset's JSON parameter map to typed scalars, preserving
/// declaration order.
pub fn parameters_to_list(map: &serde_json::Map<String, serde_json::Value>) -> ParameterList {
    map.iter()
        .map(|(name, value)| (name.clone(), ScalarValue::from_json(value)))
        .collect()
}

/// Content fingerprint used by hot reload to detect modified specs.
pub fn spec_fingerprint(spec: &DatasetSpec) -> u64 {
    let serialized = serde_json::to_string(spec).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    serialized.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_spec(dir: &Path, file: &str, id: &str) {
        let json = serde_json::json!({
            "id": id,
            "cron": "0 0 2 * * ?",
            "source": {
                "kind": "mssql",
                "connectionKey": "k",
                "extractionKind": "procedure",
                "procedure": "dbo.sp_X",
                "parameters": {"Limit": 10, "Ratio": 0.5, "Active": true, "Tag": null}
            },
            "output": {"fileNamePattern": "x.parquet"},
            "destination": {"provider": "fs", "path": "out"}
        });
        std::fs::write(dir.join(file), json.to_string()).unwrap();
    }

    #[test]
    fn file_pattern_matches_only_dataset_json() {
        assert!(is_dataset_file("dataset-trades.json"));
        assert!(is_dataset_file("dataset-1.json"));
        assert!(!is_dataset_file("dataset-.json"));
        assert!(!is_dataset_file("trades.json"));
        assert!(!is_dataset_file("dataset-trades.yaml"));
        assert!(!is_dataset_file("readme.md"));
    }

    #[test]
    fn loads_matching_files_and_ignores_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        write_spec(dir.path(), "dataset-a.json", "a");
        write_spec(dir.path(), "dataset-b.json", "b");
        write_spec(dir.path(), "other.json", "ignored");

        let specs = load_datasets(dir.path());
        let ids: Vec<_> = specs.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn broken_file_is_skipped_without_failing_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        write_spec(dir.path(), "dataset-good.json", "good");
        std::fs::write(dir.path().join("dataset-bad.json"), "{not json").unwrap();
        // Parses but fails validation: keepLocalCopy without a path.
        let mut invalid = serde_json::json!({
            "id": "half",
            "cron": "0 0 2 * * ?",
            "keepLocalCopy": true,
            "source": {
                "kind": "mssql",
                "connectionKey": "k",
                "extractionKind": "procedure",
                "procedure": "p"
            },
            "output": {"fileNamePattern": "x.parquet"},
            "destination": {"provider": "fs"}
        });
        invalid["keepLocalCopy"] = serde_json::json!(true);
        std::fs::write(
            dir.path().join("dataset-half.json"),
            invalid.to_string(),
        )
        .unwrap();

        let specs = load_datasets(dir.path());
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id, "good");
    }

    #[test]
    fn missing_directory_yields_empty_schedule() {
        assert!(load_datasets(Path::new("/definitely/not/here")).is_empty());
    }

    #[test]
    fn parameters_coerce_to_narrowest_scalars_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_spec(dir.path(), "dataset-a.json", "a");
        let specs = load_datasets(dir.path());
        let params = parameters_to_list(&specs[0].source.parameters);

        assert_eq!(params[0], ("Limit".into(), ScalarValue::Int32(10)));
        assert_eq!(params[1], ("Ratio".into(), ScalarValue::Float64(0.5)));
        assert_eq!(params[2], ("Active".into(), ScalarValue::Bool(true)));
        assert_eq!(params[3], ("Tag".into(), ScalarValue::Null));
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        write_spec(dir.path(), "dataset-a.json", "a");
        let original = load_datasets(dir.path()).remove(0);
        let mut modified = original.clone();
        modified.cron = "0 0 3 * * ?".into();

        assert_eq!(spec_fingerprint(&original), spec_fingerprint(&original));
        assert_ne!(spec_fingerprint(&original), spec_fingerprint(&modified));
    }
}
