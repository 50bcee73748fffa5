//! Query result cache - shared key/value store with per-endpoint TTLs

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::Result;
use crate::metrics::Metrics;

pub const DASHBOARD_TTL_SECS: u64 = 60;
pub const DETAILED_STATS_TTL_SECS: u64 = 60;
pub const TRANSACTION_STATS_TTL_SECS: u64 = 300;
pub const USER_BEHAVIOR_TTL_SECS: u64 = 600;

const KEY_PREFIX: &str = "logvault";

/// Failure of the cache backend itself; never surfaced to API callers
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Shared key/value cache with expiring entries
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheError>;

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> std::result::Result<(), CacheError>;

    /// Connectivity probe used by readiness checks
    async fn ping(&self) -> std::result::Result<(), CacheError> {
        Ok(())
    }
}

/// Redis-backed cache; each operation gets its own multiplexed connection
/// and is bounded by `timeout`.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    timeout: Duration,
}

impl RedisCache {
    pub fn new(url: &str, timeout: Duration) -> std::result::Result<Self, CacheError> {
        let client =
            redis::Client::open(url).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    async fn run<T, F, Fut>(&self, op: F) -> std::result::Result<T, CacheError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut + Send,
        Fut: Future<Output = redis::RedisResult<T>> + Send,
        T: Send,
    {
        let work = async {
            let conn = self.client.get_multiplexed_async_connection().await?;
            op(conn).await
        };

        match tokio::time::timeout(self.timeout, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CacheError::Unavailable(e.to_string())),
            Err(_) => Err(CacheError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheError> {
        let key = key.to_string();
        self.run(move |mut conn| async move { conn.get::<_, Option<String>>(key).await })
            .await
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> std::result::Result<(), CacheError> {
        let key = key.to_string();
        let value = value.to_string();
        self.run(move |mut conn| async move {
            conn.set_ex::<_, _, ()>(key, value, ttl_secs.max(1)).await
        })
        .await
    }

    async fn ping(&self) -> std::result::Result<(), CacheError> {
        self.run(|mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}

/// In-process cache used when no Redis is configured
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> std::result::Result<Option<String>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires)) if *expires > now => return Ok(Some(value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        entries.remove(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> std::result::Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(
            key.to_string(),
            (value.to_string(), now + Duration::from_secs(ttl_secs)),
        );
        Ok(())
    }
}

/// Deterministic cache key: endpoint identity plus its normalized filters.
///
/// Object keys are sorted and null or empty-string values dropped, so
/// equivalent filter sets map to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(endpoint: &str, filters: &impl Serialize) -> Self {
        let filters = serde_json::to_value(filters)
            .map(normalize)
            .unwrap_or(Value::Null);

        match filters {
            Value::Null => Self::endpoint(endpoint),
            Value::Object(ref map) if map.is_empty() => Self::endpoint(endpoint),
            other => Self(format!("{}:{}:{}", KEY_PREFIX, endpoint, other)),
        }
    }

    /// Key for an endpoint without filters
    pub fn endpoint(endpoint: &str) -> Self {
        Self(format!("{}:{}", KEY_PREFIX, endpoint))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, normalize(v)))
                .filter(|(_, v)| !v.is_null() && v.as_str() != Some(""))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize).collect()),
        Value::String(s) => Value::String(s.trim().to_string()),
        other => other,
    }
}

/// A result tagged with whether it came from the cache
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cached<T> {
    #[serde(flatten)]
    pub value: T,
    pub cached: bool,
}

/// Read-through cache in front of engine queries.
///
/// Backend failures degrade to direct computation. There is no
/// invalidation on writes; entries live until their TTL expires.
#[derive(Clone)]
pub struct QueryCache {
    backend: Arc<dyn Cache>,
    metrics: Arc<Metrics>,
}

impl QueryCache {
    pub fn new(backend: Arc<dyn Cache>, metrics: Arc<Metrics>) -> Self {
        Self { backend, metrics }
    }

    pub async fn ping(&self) -> std::result::Result<(), CacheError> {
        self.backend.ping().await
    }

    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl_secs: u64,
        compute: F,
    ) -> Result<Cached<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backend_up = true;

        match self.backend.get(key.as_str()).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    self.metrics.inc_cache_hit();
                    debug!(key = %key, "Cache hit");
                    return Ok(Cached {
                        value,
                        cached: true,
                    });
                }
                Err(e) => {
                    self.metrics.inc_cache_miss();
                    warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                }
            },
            Ok(None) => {
                self.metrics.inc_cache_miss();
                debug!(key = %key, "Cache miss");
            }
            Err(e) => {
                backend_up = false;
                self.metrics.inc_cache_fallback();
                warn!(key = %key, error = %e, "Cache read failed, computing directly");
            }
        }

        let value = compute().await?;

        if backend_up {
            match serde_json::to_string(&value) {
                Ok(raw) => {
                    if let Err(e) = self.backend.set(key.as_str(), &raw, ttl_secs).await {
                        self.metrics.inc_cache_fallback();
                        warn!(key = %key, error = %e, "Cache write failed");
                    } else {
                        debug!(key = %key, ttl_secs, "Cached result");
                    }
                }
                Err(e) => warn!(key = %key, error = %e, "Failed to serialize result for cache"),
            }
        }

        Ok(Cached {
            value,
            cached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::testing::FailingCache;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Stats {
        total: u64,
    }

    fn query_cache(backend: Arc<dyn Cache>) -> (QueryCache, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        (QueryCache::new(backend, Arc::clone(&metrics)), metrics)
    }

    async fn counted(cache: &QueryCache, key: &CacheKey, calls: &AtomicUsize) -> Cached<Stats> {
        cache
            .get_or_compute(key, 60, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) as u64;
                Ok(Stats { total: 100 + n })
            })
            .await
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_compute_once_within_ttl() {
        let (cache, metrics) = query_cache(Arc::new(MemoryCache::new()));
        let key = CacheKey::endpoint("stats:dashboard");
        let calls = AtomicUsize::new(0);

        let first = counted(&cache, &key, &calls).await;
        assert!(!first.cached);

        tokio::time::advance(Duration::from_secs(59)).await;
        let second = counted(&cache, &key, &calls).await;
        assert!(second.cached);
        assert_eq!(second.value, first.value);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        let third = counted(&cache, &key, &calls).await;
        assert!(!third.cached);
        assert_eq!(third.value.total, 101);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let fourth = counted(&cache, &key, &calls).await;
        assert!(fourth.cached);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits_total, 2);
        assert_eq!(snapshot.cache_misses_total, 2);
    }

    #[tokio::test]
    async fn test_unreachable_cache_degrades() {
        let (cache, metrics) = query_cache(Arc::new(FailingCache));
        let key = CacheKey::endpoint("stats:detailed");
        let calls = AtomicUsize::new(0);

        let first = counted(&cache, &key, &calls).await;
        let second = counted(&cache, &key, &calls).await;

        assert!(!first.cached && !second.cached);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(metrics.snapshot().cache_fallbacks_total, 2);
    }

    #[tokio::test]
    async fn test_compute_error_is_not_cached() {
        let (cache, _) = query_cache(Arc::new(MemoryCache::new()));
        let key = CacheKey::endpoint("stats:dashboard");

        let result: Result<Cached<Stats>> = cache
            .get_or_compute(&key, 60, || async {
                Err(AppError::Timeout("30s".into()))
            })
            .await;
        assert!(matches!(result, Err(AppError::Timeout(_))));

        let calls = AtomicUsize::new(0);
        assert!(!counted(&cache, &key, &calls).await.cached);
    }

    #[test]
    fn test_key_ignores_field_order_and_blanks() {
        let a = CacheKey::new(
            "stats:transactions",
            &json!({ "status": "completed", "startDate": "2024-01-01", "userId": null }),
        );
        let b = CacheKey::new(
            "stats:transactions",
            &json!({ "startDate": " 2024-01-01", "status": "completed", "endDate": "" }),
        );
        assert_eq!(a, b);
        assert_eq!(
            a.as_str(),
            r#"logvault:stats:transactions:{"startDate":"2024-01-01","status":"completed"}"#
        );
    }

    #[test]
    fn test_key_distinguishes_filters() {
        let a = CacheKey::new("stats:transactions", &json!({ "status": "failed" }));
        let b = CacheKey::new("stats:transactions", &json!({ "status": "completed" }));
        assert_ne!(a, b);
        assert_eq!(
            CacheKey::new("stats:dashboard", &json!({})),
            CacheKey::endpoint("stats:dashboard")
        );
    }

    #[test]
    fn test_cached_flag_flattens() {
        let value = serde_json::to_value(Cached {
            value: Stats { total: 3 },
            cached: true,
        })
        .unwrap();
        assert_eq!(value, json!({ "total": 3, "cached": true }));
    }
}
