//! Secret materialization: remote store clients, the process-wide cache,
//! and the connection-template resolver.
//!
//! Connection templates may embed `{vault:<path>}` placeholders; the
//! resolver fetches each unique path through the cache (5-minute absolute
//! TTL, single-flight per path) and rewrites the template textually.

pub mod cache;
pub mod http;
pub mod resolver;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use cache::SecretCache;
pub use http::{ApiKeyStore, VaultStore};
pub use resolver::TemplateResolver;

/// Failure modes of a secret fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    #[error("secret store rejected the credentials: {0}")]
    Auth(String),
    #[error("secret '{0}' not found or empty")]
    NotFound(String),
    #[error("secret transport failure{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },
    #[error("secret fetch cancelled")]
    Cancelled,
}

impl SecretError {
    /// Whether the transport failure smells like a TLS/certificate problem.
    ///
    /// These get a distinct log line so operators can tell a broken client
    /// identity apart from an unreachable store.
    pub fn is_tls_related(&self) -> bool {
        match self {
            Self::Transport { message, .. } => {
                let lower = message.to_ascii_lowercase();
                ["certificate", "tls", "ssl", "handshake"]
                    .iter()
                    .any(|needle| lower.contains(needle))
            }
            _ => false,
        }
    }
}

/// A remote secret store addressed by hierarchical path.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch the secret value at `path`.
    async fn get_secret(&self, path: &str, cancel: &CancellationToken)
        -> Result<String, SecretError>;

    /// Backend tag for logs.
    fn provider_name(&self) -> &str;
}
