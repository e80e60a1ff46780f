//! Object-store delivery (S3-compatible).

use super::{BlobSettings, UploadError, UploadProvider, UploadReceipt};
use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// S3-compatible blob destination.
///
/// The container is ensured once per provider instance; uploads overwrite
/// existing keys.
pub struct BlobProvider {
    client: Client,
    bucket: String,
    bucket_ready: OnceCell<()>,
}

impl BlobProvider {
    pub fn new(settings: &BlobSettings, bucket: String) -> Self {
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "tablift-blob",
        );
        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(settings.region.clone()))
            .force_path_style(settings.path_style);
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket,
            bucket_ready: OnceCell::new(),
        }
    }

    /// Create the container when it does not exist yet.
    async fn ensure_bucket(&self) -> Result<(), UploadError> {
        self.bucket_ready
            .get_or_try_init(|| async {
                if self
                    .client
                    .head_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .is_ok()
                {
                    return Ok(());
                }
                tracing::info!(bucket = %self.bucket, "Creating missing blob container");
                self.client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(UploadError::wrap)
            })
            .await
            .map(|_| ())
    }
}

/// Join the destination path and file name with `/` separators.
fn blob_key(destination_path: &str, file_name: &str) -> String {
    let prefix = destination_path
        .split(['/', '\\'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if prefix.is_empty() {
        file_name.to_string()
    } else {
        format!("{prefix}/{file_name}")
    }
}

#[async_trait]
impl UploadProvider for BlobProvider {
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
        self.ensure_bucket().await?;

        let key = blob_key(destination_path, file_name);
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data.to_vec()))
            .send();

        tokio::select! {
            _ = cancel.cancelled() => Err(UploadError::Cancelled),
            result = put => {
                result.map_err(UploadError::wrap)?;
                tracing::debug!(bucket = %self.bucket, key = %key, bytes = data.len(), "Blob uploaded");
                Ok(UploadReceipt {
                    path: format!("s3://{}/{}", self.bucket, key),
                    bytes_written: data.len() as u64,
                })
            }
        }
    }

    fn tag(&self) -> &str {
        "blob"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_join_with_forward_slashes() {
        assert_eq!(blob_key("daily/trades", "tr.parquet"), "daily/trades/tr.parquet");
        assert_eq!(blob_key("daily\\trades", "tr.parquet"), "daily/trades/tr.parquet");
        assert_eq!(blob_key("", "tr.parquet"), "tr.parquet");
        assert_eq!(blob_key("/daily/", "tr.parquet"), "daily/tr.parquet");
    }

    #[test]
    fn provider_reports_its_tag() {
        let settings = BlobSettings {
            bucket: "artifacts".into(),
            region: "eu-west-1".into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
            endpoint: None,
            path_style: false,
        };
        let provider = BlobProvider::new(&settings, settings.bucket.clone());
        assert_eq!(provider.tag(), "blob");
    }
}
