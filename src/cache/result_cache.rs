//! TTL-keyed cache of prior tool results
//!
//! Keys combine server, tool and canonicalized parameters, so logically
//! identical calls hit the same entry regardless of JSON key order. Entries
//! expire by time only; there is no stampede protection, concurrent identical
//! misses may each execute and overwrite.

use crate::utils::clock::SharedClock;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cached tool result with TTL tracking
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

/// Pluggable key-value store behind the cache. In-memory by default; a shared
/// external store is a valid substitution.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<CacheEntry>;
    async fn set(&self, key: String, entry: CacheEntry);
    async fn remove(&self, key: &str);
    async fn clear(&self);
    async fn len(&self) -> usize;
}

/// Default process-local backend
#[derive(Default)]
pub struct InMemoryBackend {
    entries: DashMap<String, CacheEntry>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    async fn set(&self, key: String, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    async fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn clear(&self) {
        self.entries.clear();
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Shared result cache over a backend
pub struct ResultCache {
    backend: Arc<dyn CacheBackend>,
    clock: SharedClock,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>, clock: SharedClock) -> Self {
        Self { backend, clock }
    }

    /// Build the cache key for a call: `server:tool:<canonical params>`.
    pub fn cache_key(server: &str, tool_name: &str, params: &Value) -> String {
        format!("{}:{}:{}", server, tool_name, canonicalize(params))
    }

    /// Live (non-expired) entry for a key; expired entries are dropped on
    /// read.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let entry = self.backend.get(key).await?;
        if entry.is_expired(self.clock.now()) {
            debug!("cache entry expired: {}", key);
            self.backend.remove(key).await;
            return None;
        }
        Some(entry.value)
    }

    pub async fn set(&self, key: String, value: Value, ttl: Duration) {
        // Zero TTL means caching is disabled for this server.
        if ttl.is_zero() {
            return;
        }
        self.backend
            .set(
                key,
                CacheEntry {
                    value,
                    inserted_at: self.clock.now(),
                    ttl,
                },
            )
            .await;
    }

    pub async fn invalidate(&self, key: &str) {
        self.backend.remove(key).await;
    }

    pub async fn clear(&self) {
        self.backend.clear().await;
    }

    pub async fn len(&self) -> usize {
        self.backend.len().await
    }
}

/// Stable textual form of a JSON value: object keys sorted recursively.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}
