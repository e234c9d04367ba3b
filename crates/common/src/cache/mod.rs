//! Result cache
//!
//! Provides:
//! - A `CacheBackend` seam with Redis and in-process implementations
//! - Generic JSON get/set operations with TTL
//! - Key builders for analyses, scores, research results and chat sessions
//!
//! Callers treat a cache error as a miss: nothing in the pipeline fails
//! because the cache is unavailable.

use crate::config::RedisConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Raw string storage with expiry
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a live value
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value that expires after `ttl`
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove a value, reporting whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Check backend connectivity
    async fn ping(&self) -> Result<()>;

    /// Backend name for logs and health output
    fn name(&self) -> &'static str;
}

/// Redis-backed storage
pub struct RedisBackend {
    connection: ConnectionManager,
}

impl RedisBackend {
    /// Connect to Redis
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        conn.get(key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to get key '{}': {}", key, e),
        })
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", key, e),
            })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let deleted: i32 = conn.del(key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to delete key '{}': {}", key, e),
        })?;
        Ok(deleted > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Writes between sweeps of expired entries in `MemoryBackend`
const SWEEP_EVERY: usize = 256;

/// In-process storage. Expired entries are dropped on read and swept
/// periodically on write.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, (String, Instant)>,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.1 > now);
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.1 > now {
                return Ok(Some(entry.0.clone()));
            }
        }
        // Only remove if still expired; a concurrent write may have replaced it
        self.entries.remove_if(key, |_, entry| entry.1 <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep();
        }
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Namespaced JSON cache over a backend
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    key_prefix: String,
    default_ttl: Duration,
}

impl Cache {
    /// Create a cache over an explicit backend
    pub fn new(backend: Arc<dyn CacheBackend>, key_prefix: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
            default_ttl,
        }
    }

    /// In-process cache, used in tests and when Redis is not configured
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryBackend::new()),
            "researchforge",
            Duration::from_secs(3600),
        )
    }

    /// Connect using configuration, falling back to memory if Redis is unusable
    pub async fn from_config(config: &RedisConfig) -> Self {
        let ttl = Duration::from_secs(config.default_ttl_secs);

        let backend: Arc<dyn CacheBackend> = match config.url.as_deref() {
            Some(url) => match RedisBackend::connect(url).await {
                Ok(backend) => {
                    info!("Redis cache connected");
                    Arc::new(backend)
                }
                Err(e) => {
                    warn!(error = %e, "Redis unavailable, using in-memory cache");
                    Arc::new(MemoryBackend::new())
                }
            },
            None => {
                info!("No Redis URL configured, using in-memory cache");
                Arc::new(MemoryBackend::new())
            }
        };

        Self::new(backend, config.key_prefix.clone(), ttl)
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    /// Get a value from cache
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full_key = self.key(key);

        match self.backend.get(&full_key).await? {
            Some(json) => {
                let parsed = serde_json::from_str(&json).map_err(|e| AppError::CacheError {
                    message: format!("Failed to parse cached value: {}", e),
                })?;
                debug!(key = %full_key, "Cache hit");
                Ok(Some(parsed))
            }
            None => {
                debug!(key = %full_key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Set a value in cache with default TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_ttl(key, value, self.default_ttl).await
    }

    /// Set a value in cache with custom TTL
    pub async fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let full_key = self.key(key);
        let json = serde_json::to_string(value).map_err(|e| AppError::CacheError {
            message: format!("Failed to serialize value: {}", e),
        })?;

        self.backend.set(&full_key, json, ttl).await?;
        debug!(key = %full_key, ttl_secs = ttl.as_secs(), "Cache set");
        Ok(())
    }

    /// Delete a key from cache
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let deleted = self.backend.delete(&full_key).await?;
        debug!(key = %full_key, deleted, "Cache delete");
        Ok(deleted)
    }

    /// Check if a key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.backend.get(&self.key(key)).await?.is_some())
    }

    /// Read a value, treating any cache failure as a miss
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write a value, logging and swallowing any cache failure
    pub async fn store<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Err(e) = self.set_with_ttl(key, value, ttl).await {
            warn!(error = %e, "Failed to cache value, continuing without cache");
        }
    }

    /// Get or set with a loader function
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        if let Some(cached) = self.lookup::<T>(key).await {
            return Ok(cached);
        }

        let value = loader().await?;
        self.store(key, &value, ttl).await;
        Ok(value)
    }

    /// Ping the backend to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.backend.ping().await
    }

    /// Name of the active backend
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

/// Cache key builder helpers
pub mod keys {
    use sha2::{Digest, Sha256};

    /// Trim, lowercase and collapse internal whitespace
    pub fn normalize(text: &str) -> String {
        text.split_whitespace()
            .map(|w| w.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Hex SHA-256 of the input
    pub fn hash(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    /// Build a query analysis cache key
    pub fn analysis(query: &str) -> String {
        format!("analysis:{}", hash(&normalize(query)))
    }

    /// Build a content score cache key
    pub fn content_score(query: &str, content: &str) -> String {
        format!("score:{}:{}", hash(&normalize(query)), hash(content))
    }

    /// Build a research result cache key
    pub fn research(query: &str, depth: &str) -> String {
        format!("research:{}:{}", depth, hash(&normalize(query)))
    }

    /// Build a synthesis cache key over a query and its source URLs
    pub fn synthesis(query: &str, urls: &[&str]) -> String {
        let mut material = normalize(query);
        for url in urls {
            material.push('\n');
            material.push_str(url);
        }
        format!("synthesis:{}", hash(&material))
    }

    /// Build a news lookup cache key
    pub fn news(query: &str, max_results: usize, days_back: u32) -> String {
        format!("news:{}:{}:{}", hash(&normalize(query)), max_results, days_back)
    }

    /// Build a fetched-page cache key
    pub fn page(url: &str) -> String {
        format!("page:{}", hash(url.trim()))
    }

    /// Build a chat history key
    pub fn chat_history(session_id: &str) -> String {
        format!("chat_history:{}", session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        score: f64,
    }

    #[test]
    fn test_key_builders() {
        assert_eq!(
            keys::analysis("  Rust   ASYNC "),
            keys::analysis("rust async")
        );
        assert!(keys::research("q", "deep").starts_with("research:deep:"));
        assert_eq!(keys::chat_history("abc"), "chat_history:abc");
        assert_ne!(
            keys::synthesis("q", &["https://a.com"]),
            keys::synthesis("q", &["https://b.com"])
        );
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let cache = Cache::in_memory();
        let value = Sample {
            name: "rust".into(),
            score: 0.75,
        };

        cache.set("sample", &value).await.unwrap();
        assert!(cache.exists("sample").await.unwrap());
        let loaded: Option<Sample> = cache.get("sample").await.unwrap();
        assert_eq!(loaded, Some(value));

        assert!(cache.delete("sample").await.unwrap());
        assert!(!cache.exists("sample").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_expiry() {
        let backend = MemoryBackend::new();
        backend
            .set("k", "v".into(), Duration::from_millis(5))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_unread_expired_entries_are_swept() {
        let backend = MemoryBackend::new();
        for i in 0..2000 {
            backend
                .set(&format!("score:{}", i), "v".into(), Duration::from_millis(1))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        for i in 0..SWEEP_EVERY {
            backend
                .set(&format!("live:{}", i), "v".into(), Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert!(backend.len() <= SWEEP_EVERY, "len was {}", backend.len());
        assert_eq!(backend.get("live:0").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_expired_read_keeps_fresh_replacement() {
        let backend = MemoryBackend::new();
        backend.set("k", "old".into(), Duration::ZERO).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);

        backend.set("k", "new".into(), Duration::from_secs(60)).await.unwrap();
        backend.sweep();
        assert_eq!(backend.get("k").await.unwrap(), Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_get_or_load_caches() {
        let cache = Cache::in_memory();
        let first: u32 = cache
            .get_or_load("n", Duration::from_secs(60), || async { Ok(7) })
            .await
            .unwrap();
        let second: u32 = cache
            .get_or_load("n", Duration::from_secs(60), || async {
                Err(AppError::Internal {
                    message: "loader should not run".into(),
                })
            })
            .await
            .unwrap();
        assert_eq!(first, 7);
        assert_eq!(second, 7);
    }

    #[tokio::test]
    async fn test_from_config_without_url_uses_memory() {
        let cache = Cache::from_config(&RedisConfig::default()).await;
        assert_eq!(cache.backend_name(), "memory");
        tokio_test::assert_ok!(cache.ping().await);
    }
}
