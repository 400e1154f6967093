//! Favorites store (§4.11): per-session favorite station slots, keyed by a
//! hashed session token so the store never holds the raw token at rest.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::models::favorites::{FavoriteEntry, FavoritesRecord};
use crate::models::station::ProjectedStation;
use crate::services::redis_store::RedisStore;

#[derive(Debug, thiserror::Error)]
pub enum FavoritesError {
    #[error("favorites list is full")]
    Full,
}

#[derive(Clone)]
enum Backend {
    Redis(RedisStore),
    Memory(Arc<RwLock<HashMap<String, FavoritesRecord>>>),
}

#[derive(Clone)]
pub struct FavoritesService {
    backend: Backend,
    ttl_seconds: i64,
}

fn hash_token(session_token: &str) -> String {
    let digest = Sha256::digest(session_token.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    use std::fmt::Write;
    for b in digest {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn key(hashed: &str) -> String {
    format!("favorites:{hashed}")
}

impl FavoritesService {
    pub fn with_redis(redis: RedisStore, ttl_seconds: i64) -> Self {
        Self { backend: Backend::Redis(redis), ttl_seconds }
    }

    pub fn in_memory(ttl_seconds: i64) -> Self {
        Self { backend: Backend::Memory(Arc::new(RwLock::new(HashMap::new()))), ttl_seconds }
    }

    async fn load(&self, hashed: &str) -> FavoritesRecord {
        match &self.backend {
            Backend::Redis(store) => store.get(&key(hashed)).await.ok().flatten().unwrap_or_default(),
            Backend::Memory(map) => map.read().await.get(hashed).cloned().unwrap_or_default(),
        }
    }

    async fn save(&self, hashed: &str, record: &FavoritesRecord) {
        match &self.backend {
            Backend::Redis(store) => {
                if let Err(err) = store.set_ex(&key(hashed), record, self.ttl_seconds.max(1) as u64).await {
                    tracing::warn!(error = %err, "favorites write failed");
                }
            }
            Backend::Memory(map) => {
                map.write().await.insert(hashed.to_string(), record.clone());
            }
        }
    }

    pub async fn list(&self, session_token: &str) -> FavoritesRecord {
        self.load(&hash_token(session_token)).await
    }

    /// Re-projects every stored entry against the current stations payload;
    /// persists only if a snapshot actually changed, else just refreshes the
    /// TTL (§4.11: "if projection differs from stored snapshot, persist the
    /// updated record; else only EXPIRE refresh").
    pub async fn reconcile(&self, session_token: &str, current: &[ProjectedStation]) -> FavoritesRecord {
        let hashed = hash_token(session_token);
        let mut record = self.load(&hashed).await;

        let mut changed = false;
        for entry in &mut record.entries {
            let fresh = current.iter().find(|s| s.id == entry.station_id).cloned();
            if fresh != entry.snapshot {
                entry.snapshot = fresh;
                changed = true;
            }
        }

        if changed {
            self.save(&hashed, &record).await;
        } else {
            self.touch(&hashed).await;
        }

        record
    }

    async fn touch(&self, hashed: &str) {
        match &self.backend {
            Backend::Redis(store) => {
                if let Err(err) = store.expire(&key(hashed), self.ttl_seconds.max(1)).await {
                    tracing::warn!(error = %err, "favorites TTL refresh failed");
                }
            }
            Backend::Memory(_) => {}
        }
    }

    /// Adds or refreshes a favorite, reconciling its snapshot against the
    /// current station projection. Errors with `Full` if the session
    /// already has `MAX_SLOTS` entries and `station_id` is not among them.
    pub async fn put(
        &self,
        session_token: &str,
        station_id: &str,
        snapshot: Option<ProjectedStation>,
        now: i64,
    ) -> Result<FavoritesRecord, FavoritesError> {
        let hashed = hash_token(session_token);
        let mut record = self.load(&hashed).await;

        match record.find(station_id) {
            Some(idx) => {
                record.entries[idx].snapshot = snapshot;
                record.entries[idx].saved_at = now;
            }
            None => {
                if record.is_full() {
                    return Err(FavoritesError::Full);
                }
                record.entries.push(FavoriteEntry { station_id: station_id.to_string(), saved_at: now, snapshot });
            }
        }

        self.save(&hashed, &record).await;
        Ok(record)
    }

    /// Places a favorite at an explicit slot index, clamped into range.
    /// Replaces whatever currently occupies that slot; if `station_id` is
    /// already present elsewhere it's moved rather than duplicated. Errors
    /// with `Full` only when the record needs to grow past `MAX_SLOTS` to
    /// reach the requested slot and has no room left.
    pub async fn put_at_slot(
        &self,
        session_token: &str,
        station_id: &str,
        slot: usize,
        snapshot: Option<ProjectedStation>,
        now: i64,
    ) -> Result<FavoritesRecord, FavoritesError> {
        let hashed = hash_token(session_token);
        let mut record = self.load(&hashed).await;

        if let Some(existing_idx) = record.find(station_id) {
            record.entries.remove(existing_idx);
        }

        let clamped = slot.min(crate::models::favorites::MAX_SLOTS - 1);
        let entry = FavoriteEntry { station_id: station_id.to_string(), saved_at: now, snapshot };

        if clamped >= record.entries.len() {
            if record.is_full() {
                return Err(FavoritesError::Full);
            }
            record.entries.push(entry);
        } else {
            record.entries[clamped] = entry;
        }

        self.save(&hashed, &record).await;
        Ok(record)
    }

    pub async fn remove(&self, session_token: &str, station_id: &str) -> FavoritesRecord {
        let hashed = hash_token(session_token);
        let mut record = self.load(&hashed).await;
        record.entries.retain(|e| e.station_id != station_id);
        self.save(&hashed, &record).await;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_list_round_trips() {
        let service = FavoritesService::in_memory(3600);
        let record = service.put("token-a", "station-1", None, 1000).await.unwrap();
        assert_eq!(record.entries.len(), 1);
        let listed = service.list("token-a").await;
        assert_eq!(listed.entries[0].station_id, "station-1");
    }

    #[tokio::test]
    async fn put_rejects_when_full() {
        let service = FavoritesService::in_memory(3600);
        for i in 0..crate::models::favorites::MAX_SLOTS {
            service.put("token-b", &format!("station-{i}"), None, 1000).await.unwrap();
        }
        let err = service.put("token-b", "station-overflow", None, 1000).await.unwrap_err();
        assert!(matches!(err, FavoritesError::Full));
    }

    #[tokio::test]
    async fn put_refreshes_existing_entry_without_counting_toward_full() {
        let service = FavoritesService::in_memory(3600);
        for i in 0..crate::models::favorites::MAX_SLOTS {
            service.put("token-c", &format!("station-{i}"), None, 1000).await.unwrap();
        }
        let record = service.put("token-c", "station-0", None, 2000).await.unwrap();
        assert_eq!(record.entries.len(), crate::models::favorites::MAX_SLOTS);
        assert_eq!(record.entries[0].saved_at, 2000);
    }

    #[tokio::test]
    async fn remove_drops_entry() {
        let service = FavoritesService::in_memory(3600);
        service.put("token-d", "station-1", None, 1000).await.unwrap();
        let record = service.remove("token-d", "station-1").await;
        assert!(record.entries.is_empty());
    }

    #[test]
    fn hash_token_is_deterministic_and_not_identity() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), "abc");
    }

    #[tokio::test]
    async fn put_at_slot_replaces_the_requested_index() {
        let service = FavoritesService::in_memory(3600);
        service.put("token-e", "station-a", None, 1000).await.unwrap();
        service.put("token-e", "station-b", None, 1000).await.unwrap();
        let record = service.put_at_slot("token-e", "station-c", 0, None, 2000).await.unwrap();
        assert_eq!(record.entries[0].station_id, "station-c");
        assert_eq!(record.entries.len(), 2);
    }

    #[tokio::test]
    async fn put_at_slot_moves_existing_entry_instead_of_duplicating() {
        let service = FavoritesService::in_memory(3600);
        service.put("token-f", "station-a", None, 1000).await.unwrap();
        service.put("token-f", "station-b", None, 1000).await.unwrap();
        let record = service.put_at_slot("token-f", "station-a", 1, None, 2000).await.unwrap();
        assert_eq!(record.entries.len(), 2);
        assert_eq!(record.entries.iter().filter(|e| e.station_id == "station-a").count(), 1);
    }

    #[tokio::test]
    async fn reconcile_refreshes_changed_snapshot_and_drops_removed_station() {
        use crate::models::station::ProjectedStation;

        let service = FavoritesService::in_memory(3600);
        let stale = ProjectedStation {
            id: "station-1".to_string(),
            name: "Old Name".to_string(),
            stream_url: "https://example.com/old".to_string(),
            homepage: None,
            favicon: None,
            country: None,
            country_code: None,
            state: None,
            languages: vec![],
            tags: vec![],
            bitrate: None,
            codec: None,
            hls: false,
            click_count: 0,
        };
        service.put("token-g", "station-1", Some(stale.clone()), 1000).await.unwrap();

        let mut fresh = stale.clone();
        fresh.name = "New Name".to_string();
        let record = service.reconcile("token-g", &[fresh.clone()]).await;
        assert_eq!(record.entries[0].snapshot.as_ref().unwrap().name, "New Name");

        let record = service.reconcile("token-g", &[]).await;
        assert!(record.entries[0].snapshot.is_none());
    }
}
