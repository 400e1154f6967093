//! Tiered response cache (C5). Tier A is a process-local bounded LRU with
//! per-entry TTL; Tier B is an optional shared Redis store. Reads consult
//! Tier B first, then Tier A; writes land in both, asynchronously for Tier B
//! so the client response is never held up by the cache write.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::Utc;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::redis_store::RedisStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    /// Headers to replay verbatim; `set-cookie` and `content-length` are
    /// never stored here (enforced by the caller's store predicate).
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub expires_at: i64,
}

pub struct ResponseCache {
    tier_a: Arc<Mutex<LruCache<String, CacheEntry>>>,
    tier_b: Option<RedisStore>,
    default_ttl_ms: i64,
}

impl ResponseCache {
    pub fn new(max_entries: usize, default_ttl_ms: i64, tier_b: Option<RedisStore>) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1)).unwrap();
        Self {
            tier_a: Arc::new(Mutex::new(LruCache::new(capacity))),
            tier_b,
            default_ttl_ms,
        }
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = Utc::now().timestamp_millis();

        if let Some(store) = &self.tier_b {
            if let Ok(Some(entry)) = store.get::<CacheEntry>(&format!("respcache:{key}")).await {
                if entry.expires_at > now {
                    return Some(entry);
                }
            }
        }

        let mut tier_a = self.tier_a.lock().await;
        if let Some(entry) = tier_a.get(key) {
            if entry.expires_at > now {
                return Some(entry.clone());
            }
            tier_a.pop(key);
        }
        None
    }

    /// Decides whether a response is eligible to be cached at all, per the
    /// store predicate in the design notes: GET-only callers already
    /// filtered upstream; here we gate on status/content-type and the
    /// "never cache a Set-Cookie-bearing response" rule.
    pub fn is_storable(status: u16, content_type: Option<&str>, has_set_cookie: bool) -> bool {
        if has_set_cookie {
            return false;
        }
        if !matches!(status, 200 | 204) {
            return false;
        }
        content_type
            .map(|ct| ct.contains("application/json"))
            .unwrap_or(false)
    }

    pub async fn store(&self, key: String, entry: CacheEntry) {
        let mut tier_a = self.tier_a.lock().await;
        tier_a.put(key.clone(), entry.clone());
        drop(tier_a);

        if let Some(store) = self.tier_b.clone() {
            let ttl_seconds = ((entry.expires_at - Utc::now().timestamp_millis()).max(1000) / 1000) as u64;
            tokio::spawn(async move {
                if let Err(err) = store.set_ex(&format!("respcache:{key}"), &entry, ttl_seconds).await {
                    tracing::warn!(error = %err, "response cache tier B write failed");
                }
            });
        }
    }

    pub fn default_ttl_ms(&self) -> i64 {
        self.default_ttl_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storable_requires_json_and_ok_status() {
        assert!(ResponseCache::is_storable(200, Some("application/json; charset=utf-8"), false));
        assert!(!ResponseCache::is_storable(200, Some("text/html"), false));
        assert!(!ResponseCache::is_storable(500, Some("application/json"), false));
        assert!(!ResponseCache::is_storable(200, Some("application/json"), true));
    }

    #[tokio::test]
    async fn round_trips_through_tier_a() {
        let cache = ResponseCache::new(10, 30_000, None);
        let entry = CacheEntry {
            status: 200,
            headers: vec![],
            body: b"{}".to_vec(),
            expires_at: Utc::now().timestamp_millis() + 10_000,
        };
        cache.store("radio:/stations".to_string(), entry.clone()).await;
        let found = cache.get("radio:/stations").await.unwrap();
        assert_eq!(found.body, entry.body);
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let cache = ResponseCache::new(10, 30_000, None);
        let entry = CacheEntry {
            status: 200,
            headers: vec![],
            body: b"{}".to_vec(),
            expires_at: Utc::now().timestamp_millis() - 1,
        };
        cache.store("radio:/stations".to_string(), entry).await;
        assert!(cache.get("radio:/stations").await.is_none());
    }
}
