//! Caching Layer Module
//!
//! TTL key-value cache for fetched file contents and generated question
//! sets, plus the distributed lock guarding question generation.
//!
//! # Features
//!
//! - **In-Memory Cache**: LRU cache with per-entry TTL, always available
//! - **Redis Support**: Optional durable tier for multi-worker deployments
//! - **Pass-Through Degradation**: a failing Redis never fails a request
//! - **Distributed Lock**: SETNX-style acquire with TTL and explicit release
//! - **Statistics**: hit/miss tracking
//!
//! Values are stored JSON-encoded so the Redis tier stays readable across
//! workers written in any language.
//!
//! # Example
//!
//! ```rust,no_run
//! use repogrill::cache::{CacheConfig, CacheLayer};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = CacheLayer::new(CacheConfig::default())?;
//! cache.set("key", &"value", Some(3600)).await;
//! if let Some(value) = cache.get::<String>("key").await {
//!     println!("cached: {}", value);
//! }
//! # Ok(())
//! # }
//! ```

use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::RepoRef;

type RedisPool = deadpool_redis::Pool;

/// TTL for cached file contents (24 hours).
pub const CONTENT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// TTL for the generation lock (5 minutes).
pub const GENERATION_LOCK_TTL_SECS: u64 = 5 * 60;

// ============================================================================
// Configuration
// ============================================================================

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of items in the memory cache
    pub max_memory_items: usize,

    /// Default TTL in seconds (None = no expiration)
    pub default_ttl: Option<u64>,

    /// Redis connection URL; memory-only when absent
    pub redis_url: Option<String>,

    /// Redis key prefix
    pub redis_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_items: 2000,
            default_ttl: Some(CONTENT_CACHE_TTL_SECS),
            redis_url: None,
            redis_prefix: "repogrill:".to_string(),
        }
    }
}

impl CacheConfig {
    /// Memory-only configuration for tests and single-process runs
    pub fn memory_only() -> Self {
        Self {
            redis_url: None,
            ..Default::default()
        }
    }

    /// Configuration with a Redis tier
    pub fn with_redis(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: Some(redis_url.into()),
            ..Default::default()
        }
    }
}

// ============================================================================
// LRU Store
// ============================================================================

struct MemEntry {
    value: String,
    expires_at: Option<u64>,
}

impl MemEntry {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => now_timestamp() > at,
            None => false,
        }
    }
}

struct LruStore {
    capacity: usize,
    map: HashMap<String, MemEntry>,
    access_order: Vec<String>,
}

impl LruStore {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            access_order: Vec::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<&str> {
        if self.map.get(key).map(|e| e.is_expired()).unwrap_or(false) {
            self.remove(key);
            return None;
        }
        if self.map.contains_key(key) {
            self.access_order.retain(|k| k != key);
            self.access_order.push(key.to_string());
            return self.map.get(key).map(|e| e.value.as_str());
        }
        None
    }

    fn set(&mut self, key: String, value: String, ttl: Option<u64>) {
        if self.map.contains_key(&key) {
            self.access_order.retain(|k| k != &key);
        }
        while self.map.len() >= self.capacity {
            if let Some(oldest) = self.access_order.first().cloned() {
                self.map.remove(&oldest);
                self.access_order.remove(0);
            } else {
                break;
            }
        }
        self.map.insert(
            key.clone(),
            MemEntry {
                value,
                expires_at: ttl.map(|t| now_timestamp() + t),
            },
        );
        self.access_order.push(key);
    }

    fn remove(&mut self, key: &str) -> bool {
        if self.map.remove(key).is_some() {
            self.access_order.retain(|k| k != key);
            true
        } else {
            false
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub memory_items: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ============================================================================
// Cache Layer
// ============================================================================

/// Two-tier TTL cache: always-on memory LRU, optional Redis behind it.
/// Redis failures degrade to pass-through and are never surfaced.
pub struct CacheLayer {
    config: CacheConfig,
    memory: Arc<RwLock<LruStore>>,
    stats: Arc<RwLock<CacheStats>>,
    redis_pool: Option<RedisPool>,
}

impl CacheLayer {
    pub fn new(config: CacheConfig) -> anyhow::Result<Self> {
        let redis_pool = match &config.redis_url {
            Some(url) => {
                let cfg = deadpool_redis::Config::from_url(url);
                match cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
                    Ok(pool) => Some(pool),
                    Err(err) => {
                        warn!("Redis pool creation failed, cache is memory-only: {}", err);
                        None
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            memory: Arc::new(RwLock::new(LruStore::new(config.max_memory_items))),
            stats: Arc::new(RwLock::new(CacheStats::default())),
            redis_pool,
            config,
        })
    }

    /// Get a value; a memory miss falls through to Redis when configured.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        {
            let mut memory = self.memory.write().await;
            if let Some(json) = memory.get(key) {
                let parsed = serde_json::from_str(json).ok();
                if parsed.is_some() {
                    self.stats.write().await.hits += 1;
                    return parsed;
                }
                memory.remove(key);
            }
        }

        if let Some(json) = self.get_from_redis(key).await {
            if let Ok(value) = serde_json::from_str::<T>(&json) {
                let mut memory = self.memory.write().await;
                memory.set(key.to_string(), json, self.config.default_ttl);
                self.stats.write().await.hits += 1;
                return Some(value);
            }
        }

        self.stats.write().await.misses += 1;
        None
    }

    /// Set a value in both tiers. Serialization problems and Redis
    /// failures are logged, never returned.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: Option<u64>) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(err) => {
                warn!("Cache serialization failed for {}: {}", key, err);
                return;
            }
        };
        let ttl = ttl_seconds.or(self.config.default_ttl);

        {
            let mut memory = self.memory.write().await;
            memory.set(key.to_string(), json.clone(), ttl);
        }
        self.stats.write().await.sets += 1;

        self.set_in_redis(key, &json, ttl).await;
    }

    /// Delete a value from both tiers.
    pub async fn delete(&self, key: &str) -> bool {
        let removed = self.memory.write().await.remove(key);
        self.delete_from_redis(key).await;
        removed
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.stats.read().await.clone();
        stats.memory_items = self.memory.read().await.len();
        stats
    }

    // ========================================================================
    // Redis Operations (all pass-through on failure)
    // ========================================================================

    async fn redis_conn(&self) -> Option<deadpool_redis::Connection> {
        let pool = self.redis_pool.as_ref()?;
        match pool.get().await {
            Ok(conn) => Some(conn),
            Err(err) => {
                warn!("Redis unavailable, continuing without it: {}", err);
                None
            }
        }
    }

    async fn get_from_redis(&self, key: &str) -> Option<String> {
        let mut conn = self.redis_conn().await?;
        let full_key = self.redis_key(key);
        match conn.get::<_, Option<String>>(&full_key).await {
            Ok(value) => value,
            Err(err) => {
                warn!("Redis GET failed for {}: {}", full_key, err);
                None
            }
        }
    }

    async fn set_in_redis(&self, key: &str, json: &str, ttl: Option<u64>) {
        let Some(mut conn) = self.redis_conn().await else {
            return;
        };
        let full_key = self.redis_key(key);
        let result = match ttl {
            Some(seconds) => conn.set_ex::<_, _, ()>(&full_key, json, seconds).await,
            None => conn.set::<_, _, ()>(&full_key, json).await,
        };
        if let Err(err) = result {
            warn!("Redis SET failed for {}: {}", full_key, err);
        }
    }

    async fn delete_from_redis(&self, key: &str) {
        let Some(mut conn) = self.redis_conn().await else {
            return;
        };
        let full_key = self.redis_key(key);
        if let Err(err) = conn.del::<_, ()>(&full_key).await {
            warn!("Redis DEL failed for {}: {}", full_key, err);
        }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.config.redis_prefix, key)
    }
}

// ============================================================================
// Cache Key Builders
// ============================================================================

/// Helper for building cache keys
pub struct CacheKey;

impl CacheKey {
    /// Content key: `file_content:<repo_sanitized>:<sha256(repo:path)>`.
    pub fn file_content(repo: &RepoRef, path: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(repo.full_name().as_bytes());
        hasher.update(b":");
        hasher.update(path.as_bytes());
        format!(
            "file_content:{}:{}",
            repo.sanitized(),
            hex::encode(hasher.finalize())
        )
    }

    pub fn questions(analysis_id: &Uuid) -> String {
        format!("questions:{}", analysis_id)
    }

    pub fn generation_lock(analysis_id: &Uuid) -> String {
        format!("generation_lock:{}", analysis_id)
    }
}

// ============================================================================
// Distributed Lock
// ============================================================================

/// Outcome of a lock acquisition attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum LockAcquisition {
    /// This caller holds the lock and must release it.
    Acquired,
    /// Another worker holds the lock.
    Held,
    /// The lock backend is unavailable; callers proceed without the lock.
    Unavailable,
}

/// SETNX-style lock with TTL. Backed by Redis when configured, otherwise
/// by an in-process set, which is sufficient for single-worker runs.
pub struct DistributedLock {
    redis_pool: Option<RedisPool>,
    redis_prefix: String,
    local: Mutex<HashMap<String, u64>>,
    ttl_secs: u64,
}

impl DistributedLock {
    pub fn new(config: &CacheConfig) -> Self {
        let redis_pool = config.redis_url.as_ref().and_then(|url| {
            deadpool_redis::Config::from_url(url)
                .create_pool(Some(deadpool_redis::Runtime::Tokio1))
                .ok()
        });
        Self {
            redis_pool,
            redis_prefix: config.redis_prefix.clone(),
            local: Mutex::new(HashMap::new()),
            ttl_secs: GENERATION_LOCK_TTL_SECS,
        }
    }

    /// Attempt to acquire `key`. Acquisition is atomic; a held lock is
    /// reported, not waited on.
    pub async fn acquire(&self, key: &str) -> LockAcquisition {
        if let Some(pool) = &self.redis_pool {
            let full_key = format!("{}{}", self.redis_prefix, key);
            match pool.get().await {
                Ok(mut conn) => {
                    let result: redis::RedisResult<bool> = redis::cmd("SET")
                        .arg(&full_key)
                        .arg("1")
                        .arg("NX")
                        .arg("EX")
                        .arg(self.ttl_secs)
                        .query_async(&mut conn)
                        .await;
                    return match result {
                        Ok(true) => LockAcquisition::Acquired,
                        Ok(false) => LockAcquisition::Held,
                        Err(err) => {
                            warn!("Lock backend failed, running without lock: {}", err);
                            LockAcquisition::Unavailable
                        }
                    };
                }
                Err(err) => {
                    warn!("Lock backend unavailable, running without lock: {}", err);
                    return LockAcquisition::Unavailable;
                }
            }
        }

        // In-process fallback with the same TTL semantics.
        let mut local = self.local.lock().await;
        let now = now_timestamp();
        local.retain(|_, expires| *expires > now);
        if local.contains_key(key) {
            LockAcquisition::Held
        } else {
            local.insert(key.to_string(), now + self.ttl_secs);
            LockAcquisition::Acquired
        }
    }

    /// Release `key`. Safe to call on completion and on error paths.
    pub async fn release(&self, key: &str) {
        if let Some(pool) = &self.redis_pool {
            let full_key = format!("{}{}", self.redis_prefix, key);
            if let Ok(mut conn) = pool.get().await {
                if let Err(err) = conn.del::<_, ()>(&full_key).await {
                    warn!("Lock release failed for {}: {}", full_key, err);
                }
                return;
            }
        }
        self.local.lock().await.remove(key);
        debug!("Released lock {}", key);
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================
