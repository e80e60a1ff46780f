//! Filesystem delivery with atomic replace.
//!
//! The final file only ever appears complete: bytes land in a
//! `{final}.tmp.{uuid}` sibling first and are renamed onto the destination
//! name, so a concurrent reader sees either the full prior content or the
//! full new content, never a torn write.

use super::{UploadError, UploadProvider, UploadReceipt};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Local or mounted filesystem destination.
pub struct FsProvider {
    base_path: PathBuf,
}

impl FsProvider {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn target_path(&self, destination_path: &str, file_name: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.extend(normalize_segments(destination_path));
        path.push(file_name);
        path
    }
}

/// Split a destination path on either separator flavor, dropping empty and
/// self-referential segments so the result stays below the base path.
fn normalize_segments(destination_path: &str) -> Vec<String> {
    destination_path
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl UploadProvider for FsProvider {
    async fn upload(
        &self,
        destination_path: &str,
        file_name: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt, UploadError> {
        if cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let final_path = self.target_path(destination_path, file_name);
        let parent = final_path
            .parent()
            .ok_or_else(|| UploadError::Failed("destination has no parent directory".into()))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(UploadError::wrap)?;

        let temp_path = temp_sibling(&final_path);
        let write_result = write_and_rename(&temp_path, &final_path, data, cancel).await;
        if write_result.is_err() {
            // Best effort: never leave a temp file behind.
            let _ = tokio::fs::remove_file(&temp_path).await;
        }
        write_result?;

        Ok(UploadReceipt {
            path: final_path.to_string_lossy().into_owned(),
            bytes_written: data.len() as u64,
        })
    }

    fn tag(&self) -> &str {
        "fs"
    }
}

fn temp_sibling(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(format!(".tmp.{}", uuid::Uuid::new_v4()));
    PathBuf::from(name)
}

async fn write_and_rename(
    temp_path: &Path,
    final_path: &Path,
    data: &[u8],
    cancel: &CancellationToken,
) -> Result<(), UploadError> {
    tokio::select! {
        _ = cancel.cancelled() => return Err(UploadError::Cancelled),
        written = tokio::fs::write(temp_path, data) => written.map_err(UploadError::wrap)?,
    }
    tokio::fs::rename(temp_path, final_path)
        .await
        .map_err(UploadError::wrap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_creates_parents_and_reports_the_absolute_path() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new(dir.path());
        let receipt = provider
            .upload("daily/trades", "tr.parquet", b"bytes", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(receipt.bytes_written, 5);
        let expected = dir.path().join("daily").join("trades").join("tr.parquet");
        assert_eq!(receipt.path, expected.to_string_lossy());
        assert_eq!(std::fs::read(expected).unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn upload_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new(dir.path());
        let cancel = CancellationToken::new();
        provider.upload("", "a.ctl", b"old", &cancel).await.unwrap();
        provider.upload("", "a.ctl", b"new!", &cancel).await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("a.ctl")).unwrap(), b"new!");
    }

    #[tokio::test]
    async fn no_temp_files_survive_a_successful_upload() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new(dir.path());
        provider
            .upload("", "a.parquet", b"x", &CancellationToken::new())
            .await
            .unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.parquet"]);
    }

    #[tokio::test]
    async fn cancelled_upload_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FsProvider::new(dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = provider
            .upload("", "a.parquet", b"x", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, UploadError::Cancelled);
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn separators_normalize_and_escapes_are_dropped() {
        assert_eq!(normalize_segments("a\\b/c"), vec!["a", "b", "c"]);
        assert_eq!(normalize_segments("/a//b/"), vec!["a", "b"]);
        assert_eq!(normalize_segments("../a/./b"), vec!["a", "b"]);
        assert!(normalize_segments("").is_empty());
    }

    #[test]
    fn temp_sibling_shares_the_directory() {
        let temp = temp_sibling(Path::new("/out/tr.parquet"));
        let text = temp.to_string_lossy();
        assert!(text.starts_with("/out/tr.parquet.tmp."));
    }
}
