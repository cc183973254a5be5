//! Expansion memoization.
//!
//! Keyed by the fingerprint over (value set identity, option hash,
//! language context, paging). moka provides the LRU eviction and the
//! single-flight discipline: at most one concurrent computation per key,
//! concurrent callers await the in-flight result.

use ferrotx_core::issue::TxIssue;
use moka::future::Cache;
use serde_json::Value;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Default cache capacity (number of expansions).
const DEFAULT_CACHE_CAPACITY: u64 = 200;

/// Default TTL for cached expansions (1 hour).
const DEFAULT_TTL_SECS: u64 = 3600;

/// Cache key: value set identity + parameter fingerprint + paging.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpansionKey {
    pub value_set: String,
    pub params_hash: u64,
    pub offset: usize,
    pub count: Option<usize>,
}

impl ExpansionKey {
    pub fn new(
        url: &str,
        version: Option<&str>,
        params_hash: u64,
        offset: usize,
        count: Option<usize>,
    ) -> Self {
        let value_set = match version {
            Some(version) => format!("{url}|{version}"),
            None => url.to_string(),
        };
        Self {
            value_set,
            params_hash,
            offset,
            count,
        }
    }

    fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

pub struct ExpansionCache {
    inner: Cache<u64, Arc<Value>>,
}

impl ExpansionCache {
    pub fn new() -> Self {
        Self::with_config(DEFAULT_CACHE_CAPACITY, DEFAULT_TTL_SECS)
    }

    pub fn with_config(capacity: u64, ttl_secs: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(Duration::from_secs(ttl_secs))
                .build(),
        }
    }

    /// Single-flight lookup: compute on miss, share the result (or the
    /// error) with every concurrent caller for the same key.
    pub async fn get_or_compute<F>(&self, key: &ExpansionKey, compute: F) -> Result<Arc<Value>, TxIssue>
    where
        F: FnOnce() -> Result<Value, TxIssue>,
    {
        self.inner
            .try_get_with(key.fingerprint(), async move { compute().map(Arc::new) })
            .await
            .map_err(|shared: Arc<TxIssue>| (*shared).clone())
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

impl Default for ExpansionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn caches_by_key() {
        let cache = ExpansionCache::new();
        let computed = AtomicUsize::new(0);
        let key = ExpansionKey::new("http://example.org/vs", Some("1.0"), 42, 0, None);

        for _ in 0..3 {
            let value = cache
                .get_or_compute(&key, || {
                    computed.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"expansion": true}))
                })
                .await
                .unwrap();
            assert_eq!(value.as_ref(), &json!({"expansion": true}));
        }
        assert_eq!(computed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_paging_is_a_different_key() {
        let cache = ExpansionCache::new();
        let a = ExpansionKey::new("http://example.org/vs", None, 1, 0, Some(10));
        let b = ExpansionKey::new("http://example.org/vs", None, 1, 10, Some(10));
        cache.get_or_compute(&a, || Ok(json!(1))).await.unwrap();
        let second = cache.get_or_compute(&b, || Ok(json!(2))).await.unwrap();
        assert_eq!(second.as_ref(), &json!(2));
    }

    #[tokio::test]
    async fn errors_are_not_cached_as_values() {
        let cache = ExpansionCache::new();
        let key = ExpansionKey::new("http://example.org/vs", None, 7, 0, None);
        let err = cache
            .get_or_compute(&key, || Err(TxIssue::too_costly("boom")))
            .await
            .unwrap_err();
        assert_eq!(err.code, ferrotx_core::issue::IssueType::TooCostly);

        // A later call recomputes successfully.
        let ok = cache.get_or_compute(&key, || Ok(json!("fine"))).await.unwrap();
        assert_eq!(ok.as_ref(), &json!("fine"));
    }
}
