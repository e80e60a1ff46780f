//! HTTP secret-store backends.
//!
//! Two wire dialects are supported, selected by the `provider` key of the
//! service configuration:
//!
//! * [`VaultStore`]: `GET {base}/v1/secret/data/{path}` with a bearer
//!   token and optional mutual TLS; body `{"data":{"data":{"value":…}}}`.
//! * [`ApiKeyStore`]: `GET {base}/api/secrets/{path}` with an `X-API-Key`
//!   header; body `{"secret":{"value":…}}`.
//!
//! Each backend builds exactly one `reqwest::Client` and reuses it for the
//! process lifetime; its pool does the connection reuse.

use super::{SecretError, SecretStore};
use crate::certs::ClientCertificate;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

fn transport(err: &reqwest::Error) -> SecretError {
    SecretError::Transport {
        status: err.status().map(|s| s.as_u16()),
        message: err.to_string(),
    }
}

async fn send_checked(
    request: reqwest::RequestBuilder,
    path: &str,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, SecretError> {
    let response = tokio::select! {
        _ = cancel.cancelled() => return Err(SecretError::Cancelled),
        result = request.send() => result.map_err(|e| transport(&e))?,
    };

    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(SecretError::Auth(format!(
            "store answered {status} for '{path}'"
        )));
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(SecretError::NotFound(path.to_string()));
    }
    if !status.is_success() {
        return Err(SecretError::Transport {
            status: Some(status.as_u16()),
            message: format!("store answered {status} for '{path}'"),
        });
    }
    Ok(response)
}

fn non_empty(value: String, path: &str) -> Result<String, SecretError> {
    if value.is_empty() {
        Err(SecretError::NotFound(path.to_string()))
    } else {
        Ok(value)
    }
}

// --------------------------------------------------------------------------
// Vault dialect
// --------------------------------------------------------------------------

#[derive(Deserialize)]
struct VaultEnvelope {
    data: VaultOuter,
}

#[derive(Deserialize)]
struct VaultOuter {
    data: VaultInner,
}

#[derive(Deserialize)]
struct VaultInner {
    #[serde(default)]
    value: String,
}

/// KV-v2-style secret store with bearer auth and optional mutual TLS.
pub struct VaultStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl VaultStore {
    /// Build the store and its single HTTP client.
    ///
    /// When `identity` is supplied the client presents it for mutual TLS;
    /// a bearer token may still be sent alongside.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be constructed (e.g. the PEM
    /// identity does not parse).
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        identity: Option<&ClientCertificate>,
    ) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(HTTP_TIMEOUT);
        if let Some(cert) = identity {
            tracing::info!(
                thumbprint = %cert.thumbprint,
                subject = %cert.subject,
                "Enabling mutual TLS for the vault client"
            );
            builder = builder.identity(reqwest::Identity::from_pem(&cert.pem)?);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl SecretStore for VaultStore {
    async fn get_secret(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SecretError> {
        let url = format!("{}/v1/secret/data/{}", self.base_url, path);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = send_checked(request, path, cancel).await?;
        let envelope: VaultEnvelope = response.json().await.map_err(|e| transport(&e))?;
        non_empty(envelope.data.data.value, path)
    }

    fn provider_name(&self) -> &str {
        "vault"
    }
}

// --------------------------------------------------------------------------
// API-key dialect
// --------------------------------------------------------------------------

#[derive(Deserialize)]
struct ApiKeyEnvelope {
    secret: ApiKeySecret,
}

#[derive(Deserialize)]
struct ApiKeySecret {
    #[serde(default)]
    value: String,
}

/// Flat secret store authenticated with an `X-API-Key` header.
pub struct ApiKeyStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiKeyStore {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl SecretStore for ApiKeyStore {
    async fn get_secret(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SecretError> {
        let url = format!("{}/api/secrets/{}", self.base_url, path);
        let request = self.client.get(&url).header("X-API-Key", &self.api_key);

        let response = send_checked(request, path, cancel).await?;
        let envelope: ApiKeyEnvelope = response.json().await.map_err(|e| transport(&e))?;
        non_empty(envelope.secret.value, path)
    }

    fn provider_name(&self) -> &str {
        "apikey"
    }
}
