//! TTL cache for computed metrics and trend snapshots.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache serialization error: {0}")]
    Serialize(String),
}

/// Key/value cache with per-entry expiry.
#[async_trait]
pub trait MetricsCache: Send + Sync {
    async fn put(&self, key: &str, value: JsonValue, ttl: Duration) -> Result<(), CacheError>;

    /// Fetch a live entry; expired entries read as None.
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CacheError>;

    /// Backend name for diagnostics.
    fn backend(&self) -> &'static str;
}

/// Process-local cache for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMetricsCache {
    entries: RwLock<HashMap<String, (JsonValue, Instant)>>,
}

impl InMemoryMetricsCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsCache for InMemoryMetricsCache {
    async fn put(&self, key: &str, value: JsonValue, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, (_, expires)| *expires > now);
        entries.insert(key.to_string(), (value, now + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(feature = "redis")]
pub use redis_cache::RedisMetricsCache;

#[cfg(feature = "redis")]
mod redis_cache {
    use super::*;

    use redis::aio::MultiplexedConnection;

    /// Redis-backed cache (`SET key value EX ttl`).
    #[derive(Clone)]
    pub struct RedisMetricsCache {
        conn: MultiplexedConnection,
        prefix: String,
    }

    impl RedisMetricsCache {
        pub async fn connect(
            redis_url: impl AsRef<str>,
            prefix: impl Into<String>,
        ) -> Result<Self, CacheError> {
            let client = redis::Client::open(redis_url.as_ref())
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;
            Ok(Self {
                conn,
                prefix: prefix.into(),
            })
        }

        fn key(&self, key: &str) -> String {
            format!("{}{}", self.prefix, key)
        }
    }

    #[async_trait]
    impl MetricsCache for RedisMetricsCache {
        async fn put(&self, key: &str, value: JsonValue, ttl: Duration) -> Result<(), CacheError> {
            let payload =
                serde_json::to_string(&value).map_err(|e| CacheError::Serialize(e.to_string()))?;
            let mut conn = self.conn.clone();
            redis::cmd("SET")
                .arg(self.key(key))
                .arg(payload)
                .arg("EX")
                .arg(ttl.as_secs().max(1))
                .query_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))
        }

        async fn get(&self, key: &str) -> Result<Option<JsonValue>, CacheError> {
            let mut conn = self.conn.clone();
            let raw: Option<String> = redis::cmd("GET")
                .arg(self.key(key))
                .query_async(&mut conn)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?;

            raw.map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|e| CacheError::Serialize(e.to_string()))
        }

        fn backend(&self) -> &'static str {
            "redis"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn entries_expire() {
        let cache = InMemoryMetricsCache::new();
        cache.put("live", json!(1), Duration::from_secs(60)).await.unwrap();
        cache.put("dead", json!(2), Duration::ZERO).await.unwrap();

        assert_eq!(cache.get("live").await.unwrap(), Some(json!(1)));
        assert_eq!(cache.get("dead").await.unwrap(), None);
        assert_eq!(cache.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_overwrites() {
        let cache = InMemoryMetricsCache::new();
        cache.put("k", json!({"a": 1}), Duration::from_secs(60)).await.unwrap();
        cache.put("k", json!({"a": 2}), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"a": 2})));
    }
}
