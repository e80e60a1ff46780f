//! Process-wide secret cache.
//!
//! Entries expire on an absolute TTL. Each path has its own async slot
//! mutex, so concurrent requests for the same path collapse into one
//! upstream fetch while distinct paths proceed in parallel.

use super::SecretError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default absolute TTL for cached secrets.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Default)]
struct Slot {
    value: Option<(String, Instant)>,
}

/// TTL cache with per-path single-flight.
pub struct SecretCache {
    ttl: Duration,
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Slot>>>>,
}

impl Default for SecretCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl SecretCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `path`, fetching through `fetch` when the
    /// entry is absent or its TTL has elapsed.
    ///
    /// The slot lock is held across the fetch: a second caller for the same
    /// path waits for the first fetch instead of duplicating it.
    ///
    /// # Errors
    ///
    /// Propagates the fetch error; failed fetches are not cached.
    pub async fn get_or_fetch<F>(&self, path: &str, fetch: F) -> Result<String, SecretError>
    where
        F: Future<Output = Result<String, SecretError>>,
    {
        let slot = {
            let mut slots = self.slots.lock().expect("secret cache lock poisoned");
            Arc::clone(slots.entry(path.to_string()).or_default())
        };

        let mut guard = slot.lock().await;
        if let Some((value, stored_at)) = &guard.value {
            if stored_at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
            tracing::debug!(path, "Cached secret expired, refetching");
        }

        let value = fetch.await?;
        guard.value = Some((value.clone(), Instant::now()));
        Ok(value)
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.slots
            .lock()
            .expect("secret cache lock poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counted_fetch(
        counter: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl Future<Output = Result<String, SecretError>> {
        let counter = Arc::clone(counter);
        let value = value.to_string();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    #[tokio::test]
    async fn second_call_within_ttl_hits_the_cache() {
        let cache = SecretCache::new(Duration::from_secs(300));
        let fetches = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_fetch("oracle/hr", counted_fetch(&fetches, "p@ss"))
            .await
            .unwrap();
        let second = cache
            .get_or_fetch("oracle/hr", counted_fetch(&fetches, "p@ss"))
            .await
            .unwrap();

        assert_eq!(first, "p@ss");
        assert_eq!(second, "p@ss");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_refetches() {
        let cache = SecretCache::new(Duration::from_millis(10));
        let fetches = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("p", counted_fetch(&fetches, "v1"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        let value = cache
            .get_or_fetch("p", counted_fetch(&fetches, "v2"))
            .await
            .unwrap();

        assert_eq!(value, "v2");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_requests_collapse_to_one_fetch() {
        let cache = Arc::new(SecretCache::new(Duration::from_secs(300)));
        let fetches = Arc::new(AtomicUsize::new(0));

        let slow_fetch = |counter: Arc<AtomicUsize>| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, SecretError>("shared".to_string())
        };

        let a = {
            let cache = Arc::clone(&cache);
            let fetches = Arc::clone(&fetches);
            tokio::spawn(async move { cache.get_or_fetch("k", slow_fetch(fetches)).await })
        };
        let b = {
            let cache = Arc::clone(&cache);
            let fetches = Arc::clone(&fetches);
            tokio::spawn(async move { cache.get_or_fetch("k", slow_fetch(fetches)).await })
        };

        assert_eq!(a.await.unwrap().unwrap(), "shared");
        assert_eq!(b.await.unwrap().unwrap(), "shared");
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_paths_do_not_share_entries() {
        let cache = SecretCache::new(Duration::from_secs(300));
        let fetches = Arc::new(AtomicUsize::new(0));

        cache
            .get_or_fetch("a", counted_fetch(&fetches, "va"))
            .await
            .unwrap();
        cache
            .get_or_fetch("b", counted_fetch(&fetches, "vb"))
            .await
            .unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetches_are_not_cached() {
        let cache = SecretCache::new(Duration::from_secs(300));
        let fetches = Arc::new(AtomicUsize::new(0));

        let failing = {
            let fetches = Arc::clone(&fetches);
            async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                Err::<String, _>(SecretError::NotFound("k".into()))
            }
        };
        assert!(cache.get_or_fetch("k", failing).await.is_err());

        let value = cache
            .get_or_fetch("k", counted_fetch(&fetches, "ok"))
            .await
            .unwrap();
        assert_eq!(value, "ok");
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }
}
