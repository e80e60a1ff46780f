//! Connection-template resolution.
//!
//! Templates may embed `{vault:<path>}` placeholders. Resolution scans for
//! them, fetches each unique path once through the shared cache, and
//! replaces every occurrence textually. Templates without placeholders pass
//! through without touching the store at all.

use super::{SecretCache, SecretError, SecretStore};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};
use tokio_util::sync::CancellationToken;

static VAULT_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{vault:([^}]+)\}").expect("valid vault token regex"));

/// Whether `template` embeds any `{vault:<path>}` placeholder.
pub fn contains_vault_tokens(template: &str) -> bool {
    VAULT_TOKEN_RE.is_match(template)
}

/// Rewrites connection templates using a cached secret store.
pub struct TemplateResolver {
    store: Arc<dyn SecretStore>,
    cache: Arc<SecretCache>,
}

impl TemplateResolver {
    pub fn new(store: Arc<dyn SecretStore>, cache: Arc<SecretCache>) -> Self {
        Self { store, cache }
    }

    /// Resolve every `{vault:<path>}` placeholder in `template`.
    ///
    /// Resolution is idempotent for stable secrets: resolved output contains
    /// no placeholders, so resolving it again is a no-op.
    ///
    /// # Errors
    ///
    /// Fails on the first unrecoverable secret error.
    pub async fn resolve(
        &self,
        template: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SecretError> {
        let paths: BTreeSet<&str> = VAULT_TOKEN_RE
            .captures_iter(template)
            .map(|cap| cap.get(1).expect("capture group").as_str())
            .collect();
        if paths.is_empty() {
            return Ok(template.to_string());
        }

        let mut resolved = template.to_string();
        for path in paths {
            let value = self
                .cache
                .get_or_fetch(path, self.store.get_secret(path, cancel))
                .await?;
            resolved = resolved.replace(&format!("{{vault:{path}}}"), &value);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MapStore {
        values: HashMap<String, String>,
        fetches: AtomicUsize,
    }

    impl MapStore {
        fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                values: pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SecretStore for MapStore {
        async fn get_secret(
            &self,
            path: &str,
            _cancel: &CancellationToken,
        ) -> Result<String, SecretError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.values
                .get(path)
                .cloned()
                .ok_or_else(|| SecretError::NotFound(path.to_string()))
        }

        fn provider_name(&self) -> &str {
            "map"
        }
    }

    fn resolver(store: &Arc<MapStore>) -> TemplateResolver {
        TemplateResolver::new(
            Arc::clone(store) as Arc<dyn SecretStore>,
            Arc::new(SecretCache::default()),
        )
    }

    #[tokio::test]
    async fn template_without_placeholders_skips_the_store() {
        let store = MapStore::new(&[]);
        let out = resolver(&store)
            .resolve("Server=s;User=u;Password=plain", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "Server=s;User=u;Password=plain");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn placeholder_is_replaced_with_secret_value() {
        let store = MapStore::new(&[("oracle/hr", "p@ss")]);
        let out = resolver(&store)
            .resolve(
                "Server=s;User=u;Password={vault:oracle/hr}",
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "Server=s;User=u;Password=p@ss");
    }

    #[tokio::test]
    async fn repeated_paths_fetch_once_and_replace_everywhere() {
        let store = MapStore::new(&[("shared", "x")]);
        let out = resolver(&store)
            .resolve("{vault:shared}|{vault:shared}", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "x|x");
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sequential_resolutions_share_the_cache() {
        let store = MapStore::new(&[("oracle/hr", "p@ss")]);
        let r = resolver(&store);
        let cancel = CancellationToken::new();
        for _ in 0..2 {
            let out = r
                .resolve("Server=s;User=u;Password={vault:oracle/hr}", &cancel)
                .await
                .unwrap();
            assert_eq!(out, "Server=s;User=u;Password=p@ss");
        }
        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let store = MapStore::new(&[("a", "alpha"), ("b", "beta")]);
        let r = resolver(&store);
        let cancel = CancellationToken::new();
        let once = r
            .resolve("u={vault:a};p={vault:b}", &cancel)
            .await
            .unwrap();
        let twice = r.resolve(&once, &cancel).await.unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn token_detection_matches_the_resolver() {
        assert!(contains_vault_tokens("p={vault:a/b}"));
        assert!(!contains_vault_tokens("p=plain"));
        assert!(!contains_vault_tokens("p={vault:}"));
    }

    #[tokio::test]
    async fn unknown_path_fails_the_whole_resolution() {
        let store = MapStore::new(&[]);
        let err = resolver(&store)
            .resolve("p={vault:missing/key}", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SecretError::NotFound(p) if p == "missing/key"));
    }
}
