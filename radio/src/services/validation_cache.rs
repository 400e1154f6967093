//! TTL'd stream validation result cache (§3 `ValidationCacheEntry`, §4.8).
//! Shared-store backed when Redis is configured, falling back to an
//! in-process map — the same `Backend` split as the gateway's
//! `SessionManager`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::redis_store::RedisStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCacheEntry {
    pub ok: bool,
    pub validated_at: i64,
    pub signature: String,
    pub ttl_seconds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_hls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ValidationCacheEntry {
    pub fn signature_for(stream_url: &str, last_changed_at: Option<i64>) -> String {
        format!("{stream_url}|{}", last_changed_at.unwrap_or(0))
    }

    /// Fresh iff within TTL and the signature (stream URL + station's
    /// `lastChangedAt`) still matches — a changed station invalidates any
    /// stale verdict even before the TTL lapses.
    pub fn is_fresh(&self, now: i64, expected_signature: &str) -> bool {
        self.signature == expected_signature && now - self.validated_at <= self.ttl_seconds * 1000
    }
}

#[derive(Clone)]
enum Backend {
    Redis(RedisStore),
    Memory(Arc<RwLock<HashMap<String, ValidationCacheEntry>>>),
}

#[derive(Clone)]
pub struct ValidationCache {
    backend: Backend,
}

fn key(stream_url: &str) -> String {
    format!("validation:{stream_url}")
}

impl ValidationCache {
    pub fn with_redis(redis: RedisStore) -> Self {
        Self { backend: Backend::Redis(redis) }
    }

    pub fn in_memory() -> Self {
        Self { backend: Backend::Memory(Arc::new(RwLock::new(HashMap::new()))) }
    }

    pub async fn get(&self, stream_url: &str) -> Option<ValidationCacheEntry> {
        match &self.backend {
            Backend::Redis(store) => store.get(&key(stream_url)).await.ok().flatten(),
            Backend::Memory(map) => map.read().await.get(stream_url).cloned(),
        }
    }

    pub async fn put(&self, stream_url: &str, entry: ValidationCacheEntry) {
        let ttl = entry.ttl_seconds.max(1) as u64;
        match &self.backend {
            Backend::Redis(store) => {
                if let Err(err) = store.set_ex(&key(stream_url), &entry, ttl).await {
                    tracing::warn!(error = %err, "validation cache write failed");
                }
            }
            Backend::Memory(map) => {
                map.write().await.insert(stream_url.to_string(), entry);
            }
        }
    }

    pub fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_memory_backend() {
        let cache = ValidationCache::in_memory();
        let entry = ValidationCacheEntry {
            ok: true,
            validated_at: ValidationCache::now_millis(),
            signature: ValidationCacheEntry::signature_for("https://x/stream", Some(1)),
            ttl_seconds: 3600,
            final_url: None,
            force_hls: None,
            reason: None,
        };
        cache.put("https://x/stream", entry.clone()).await;
        let found = cache.get("https://x/stream").await.unwrap();
        assert_eq!(found.signature, entry.signature);
    }

    #[test]
    fn freshness_requires_matching_signature() {
        let entry = ValidationCacheEntry {
            ok: true,
            validated_at: ValidationCache::now_millis(),
            signature: ValidationCacheEntry::signature_for("https://x/stream", Some(1)),
            ttl_seconds: 3600,
            final_url: None,
            force_hls: None,
            reason: None,
        };
        let now = ValidationCache::now_millis();
        assert!(entry.is_fresh(now, &ValidationCacheEntry::signature_for("https://x/stream", Some(1))));
        assert!(!entry.is_fresh(now, &ValidationCacheEntry::signature_for("https://x/stream", Some(2))));
    }

    #[test]
    fn freshness_respects_ttl() {
        let entry = ValidationCacheEntry {
            ok: true,
            validated_at: ValidationCache::now_millis() - 10_000,
            signature: "sig".to_string(),
            ttl_seconds: 5,
            final_url: None,
            force_hls: None,
            reason: None,
        };
        assert!(!entry.is_fresh(ValidationCache::now_millis(), "sig"));
    }
}
