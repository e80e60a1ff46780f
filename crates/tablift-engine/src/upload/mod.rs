//! Artifact delivery providers.
//!
//! One provider instance serves one execution: the Publish stage uploads
//! the packed artifact first, then the control record, through the same
//! provider. `fs` writes atomically (temp file, then rename); `blob`
//! targets an S3-compatible object store with create-if-absent semantics
//! for the container.

pub mod blob;
pub mod fs;

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tablift_types::DestinationSpec;
use tokio_util::sync::CancellationToken;

pub use blob::BlobProvider;
pub use fs::FsProvider;

/// Delivery failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UploadError {
    #[error("upload failed: {0}")]
    Failed(String),
    #[error("upload cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn wrap(err: impl std::fmt::Display) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Where the bytes landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Absolute path or canonical URI of the delivered artifact.
    pub path: String,
    pub bytes_written: u64,
}

/// Delivers bytes to one destination family.
#[async_trait]
pub trait UploadProvider: Send + Sync {
    async fn upload(
        &self,
        destination_path: &str,
        file_name: &str,
        data: &[u8],
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt, UploadError>;

    /// Provider tag for logs (`fs`, `blob`).
    fn tag(&self) -> &str;
}

impl std::fmt::Debug for dyn UploadProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadProvider").field("tag", &self.tag()).finish()
    }
}

/// Base-location settings for the filesystem provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsSettings {
    pub base_path: String,
}

/// Connection settings for the blob provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobSettings {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub path_style: bool,
}

/// Hands out a provider per destination tag.
pub trait UploadProviderFactory: Send + Sync {
    /// # Errors
    ///
    /// Fails on an unknown tag or a tag whose settings are absent from the
    /// service configuration.
    fn create(&self, destination: &DestinationSpec) -> anyhow::Result<Arc<dyn UploadProvider>>;
}

/// The production factory over the shipped providers.
pub struct ProviderFactory {
    fs: Option<FsSettings>,
    blob: Option<BlobSettings>,
}

impl ProviderFactory {
    pub fn new(fs: Option<FsSettings>, blob: Option<BlobSettings>) -> Self {
        Self { fs, blob }
    }
}

impl UploadProviderFactory for ProviderFactory {
    fn create(&self, destination: &DestinationSpec) -> anyhow::Result<Arc<dyn UploadProvider>> {
        match destination.provider.as_str() {
            "fs" => {
                let settings = self
                    .fs
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("fs provider requested but not configured"))?;
                Ok(Arc::new(FsProvider::new(&settings.base_path)))
            }
            "blob" => {
                let settings = self
                    .blob
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("blob provider requested but not configured"))?;
                // A per-dataset container may override the configured bucket.
                let bucket = destination
                    .options
                    .get("container")
                    .and_then(|v| v.as_str())
                    .unwrap_or(&settings.bucket)
                    .to_string();
                Ok(Arc::new(BlobProvider::new(settings, bucket)))
            }
            other => anyhow::bail!("unknown destination provider '{other}'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destination(provider: &str) -> DestinationSpec {
        serde_json::from_value(serde_json::json!({
            "provider": provider,
            "path": "out",
        }))
        .unwrap()
    }

    #[test]
    fn factory_rejects_unknown_tags() {
        let factory = ProviderFactory::new(None, None);
        assert!(factory.create(&destination("ftp")).is_err());
    }

    #[test]
    fn factory_requires_settings_for_the_requested_tag() {
        let factory = ProviderFactory::new(None, None);
        let err = factory.create(&destination("fs")).unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn factory_builds_fs_provider_when_configured() {
        let factory = ProviderFactory::new(
            Some(FsSettings {
                base_path: "/tmp/out".into(),
            }),
            None,
        );
        let provider = factory.create(&destination("fs")).unwrap();
        assert_eq!(provider.tag(), "fs");
    }
}
