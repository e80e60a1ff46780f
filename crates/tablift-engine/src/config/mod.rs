//! Service configuration.
//!
//! One YAML file supplies everything the host needs: the environment tag,
//! the datasets directory, named connection templates (with or without
//! `{vault:…}` placeholders), the secret-store backend, and the upload
//! providers' base locations. `${NAME}` tokens are substituted from the
//! process environment before parsing.

pub mod datasets;

use crate::certs::{CertificateProvider, PemDirectoryProvider};
use crate::secrets::{ApiKeyStore, SecretStore, VaultStore};
use crate::upload::{BlobSettings, FsSettings};
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Substitute `${VAR_NAME}` tokens with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let mut missing = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let name = &cap[1];
        match std::env::var(name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => missing.push(name.to_string()),
        }
    }

    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(result)
}

/// Hot-reload knobs for the datasets directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HotReloadConfig {
    pub enabled: bool,
    pub poll_interval_sec: u64,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_sec: 30,
        }
    }
}

/// Mutual-TLS inputs for the vault backend.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MtlsConfig {
    /// Directory holding the PEM bundles and their `certs.json` manifest.
    pub cert_dir: PathBuf,
    #[serde(default)]
    pub thumbprint: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

/// Secret-store backend selection and credentials.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretStoreConfig {
    /// `vault` or `apikey`.
    pub provider: String,
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub mtls: Option<MtlsConfig>,
}

/// Upload providers' base locations.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadConfig {
    pub fs: Option<FsSettings>,
    pub blob: Option<BlobSettings>,
}

/// The whole service configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Environment tag gating transformations (e.g. `Production`).
    #[serde(default = "default_environment")]
    pub environment: String,
    pub datasets_dir: PathBuf,
    #[serde(default)]
    pub hot_reload: HotReloadConfig,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_sec: u64,
    /// Connection templates keyed by name.
    #[serde(default)]
    pub connections: HashMap<String, String>,
    #[serde(default)]
    pub secrets: Option<SecretStoreConfig>,
    #[serde(default)]
    pub uploads: UploadConfig,
}

fn default_environment() -> String {
    "Production".to_string()
}

fn default_shutdown_grace() -> u64 {
    30
}

impl ServiceConfig {
    /// Parse a YAML string after environment interpolation.
    ///
    /// # Errors
    ///
    /// Returns an error on missing environment variables or invalid YAML.
    pub fn parse_str(yaml: &str) -> Result<Self> {
        let substituted = substitute_env_vars(yaml)?;
        serde_yaml::from_str(&substituted).context("Failed to parse service configuration")
    }

    /// Load from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read service configuration: {}", path.display()))?;
        Self::parse_str(&raw)
    }

    /// Look up a named connection template.
    ///
    /// # Errors
    ///
    /// Returns an error when the key is not configured.
    pub fn connection_template(&self, key: &str) -> Result<&str> {
        self.connections
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| anyhow::anyhow!("no connection template named '{key}'"))
    }

    /// Build the configured secret store, wiring mutual TLS when enabled.
    ///
    /// Returns `None` when no store is configured; resolution of templates
    /// containing `{vault:…}` placeholders will then fail per execution.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown provider tag, missing credentials,
    /// or an unusable client certificate.
    pub fn build_secret_store(&self) -> Result<Option<Arc<dyn SecretStore>>> {
        let Some(config) = &self.secrets else {
            return Ok(None);
        };

        let store: Arc<dyn SecretStore> = match config.provider.to_ascii_lowercase().as_str() {
            "vault" => {
                let identity = match &config.mtls {
                    Some(mtls) => {
                        let provider = PemDirectoryProvider::open(&mtls.cert_dir)?;
                        let cert = if let Some(thumbprint) = &mtls.thumbprint {
                            provider.get_required_by_thumbprint(thumbprint)?
                        } else if let Some(subject) = &mtls.subject {
                            provider.get_required_by_subject_name(subject)?
                        } else {
                            anyhow::bail!("mtls requires 'thumbprint' or 'subject'");
                        };
                        Some(cert)
                    }
                    None => None,
                };
                Arc::new(VaultStore::new(
                    &config.base_url,
                    config.token.clone(),
                    identity.as_ref(),
                )?)
            }
            "apikey" => {
                let api_key = config
                    .api_key
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("apikey provider requires 'apiKey'"))?;
                Arc::new(ApiKeyStore::new(&config.base_url, api_key)?)
            }
            other => anyhow::bail!("unknown secret provider '{other}'"),
        };
        Ok(Some(store))
    }
}
