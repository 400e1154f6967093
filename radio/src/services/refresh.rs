//! Refresh orchestration (§4.7): host rotation → fetch → normalize →
//! validate → fingerprint → persist → publish. A single in-flight refresh
//! is held behind a `tokio::sync::Mutex` guarding a `Shared` future so
//! concurrent callers (a manual trigger racing the background timer) await
//! the same run instead of duplicating upstream load; a secondary Redis
//! NX lock (mirroring the teacher's `acquire_processing_lock`) guards
//! against two service replicas refreshing at once.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{FutureExt, Shared};
use reqwest::Client;
use sqlx::PgPool;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::db::repository::stations;
use crate::models::station::{ProcessedIndex, StationsPayload};
use crate::services::fingerprint::fingerprint;
use crate::services::normalize::{normalize, DropReason, RawStationRow};
use crate::services::redis_store::RedisStore;
use crate::services::stream_validator::validate_all;
use crate::services::upstream_directory::{fetch_catalog, resolve_hosts, FetchError, HostRotation};
use crate::services::validation_cache::ValidationCache;

const REFRESH_LOCK_KEY: &str = "radio:refresh:lock";
const REFRESH_LOCK_TTL_SECONDS: u64 = 120;

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error("no upstream host returned a usable catalog")]
    AllHostsFailed,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("another replica is already refreshing")]
    LockHeld,
    #[error("upstream catalog normalized to zero usable stations")]
    EmptyResult,
}

pub struct RefreshStats {
    pub fetched: usize,
    pub dropped_not_checked_ok: usize,
    pub dropped_unusable_url: usize,
    pub dropped_insecure: usize,
    pub dropped_blocked_domain: usize,
    pub rejected_by_validation: usize,
}

pub struct RefreshResult {
    pub payload: Arc<StationsPayload>,
    pub index: Arc<ProcessedIndex>,
    pub stats: RefreshStats,
}

type SharedRefresh = Shared<Pin<Box<dyn Future<Output = Result<Arc<RefreshResult>, Arc<RefreshError>>> + Send>>>;

pub struct RefreshOrchestrator {
    config: Config,
    client: Client,
    pool: PgPool,
    host_rotation: HostRotation,
    validation_cache: ValidationCache,
    shared_lock: Option<RedisStore>,
    in_flight: Mutex<Option<SharedRefresh>>,
    instance_id: String,
}

impl RefreshOrchestrator {
    pub fn new(
        config: Config,
        client: Client,
        pool: PgPool,
        validation_cache: ValidationCache,
        shared_lock: Option<RedisStore>,
    ) -> Self {
        Self {
            config,
            client,
            pool,
            host_rotation: HostRotation::new(),
            validation_cache,
            shared_lock,
            in_flight: Mutex::new(None),
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Triggers a refresh, or joins one already in flight. Returns the same
    /// `Arc<RefreshResult>` to every caller that joins the same run. Takes
    /// `Arc<Self>` by value (the only receiver shape beyond plain `Self`
    /// that's stable for `Arc`) since the in-flight future must outlive the
    /// call that spawned it.
    pub async fn refresh(self: Arc<Self>) -> Result<Arc<RefreshResult>, Arc<RefreshError>> {
        let mut guard = self.in_flight.lock().await;
        if let Some(existing) = guard.as_ref() {
            let existing = existing.clone();
            drop(guard);
            return existing.await;
        }

        let this = Arc::clone(&self);
        let future: Pin<Box<dyn Future<Output = Result<Arc<RefreshResult>, Arc<RefreshError>>> + Send>> =
            Box::pin(async move { this.run_once().await.map(Arc::new).map_err(Arc::new) });
        let shared = future.shared();
        *guard = Some(shared.clone());
        drop(guard);

        let result = shared.await;
        self.in_flight.lock().await.take();
        result
    }

    async fn run_once(&self) -> Result<RefreshResult, RefreshError> {
        if let Some(redis) = &self.shared_lock {
            let acquired = redis
                .try_acquire_lock(REFRESH_LOCK_KEY, &self.instance_id, REFRESH_LOCK_TTL_SECONDS)
                .await
                .unwrap_or(true);
            if !acquired {
                return Err(RefreshError::LockHeld);
            }
        }

        let outcome = self.fetch_and_process().await;

        if let Some(redis) = &self.shared_lock {
            let _ = redis.del(REFRESH_LOCK_KEY).await;
        }

        outcome
    }

    async fn fetch_and_process(&self) -> Result<RefreshResult, RefreshError> {
        let hosts =
            resolve_hosts(&self.config.radio_browser_srv_name, &self.config.radio_browser_default_host).await;

        let timeout = Duration::from_millis(self.config.stream_validation_timeout_ms);
        let mut raw_rows: Option<Vec<RawStationRow>> = None;
        let mut last_error: Option<FetchError> = None;

        for _ in 0..hosts.len().max(1) {
            let host = self.host_rotation.next(&hosts);
            if host.is_empty() {
                break;
            }
            match fetch_catalog(&self.client, host, self.config.radio_browser_limit, timeout).await {
                Ok(rows) => {
                    raw_rows = Some(rows);
                    break;
                }
                Err(err) => {
                    tracing::warn!(host, error = %err, "catalog fetch failed, rotating host");
                    last_error = Some(err);
                }
            }
        }

        let raw_rows = raw_rows.ok_or_else(|| {
            tracing::error!(error = ?last_error, "all upstream hosts failed");
            RefreshError::AllHostsFailed
        })?;

        let fetched = raw_rows.len();
        let mut stats = RefreshStats {
            fetched,
            dropped_not_checked_ok: 0,
            dropped_unusable_url: 0,
            dropped_insecure: 0,
            dropped_blocked_domain: 0,
            rejected_by_validation: 0,
        };

        let mut candidates = Vec::with_capacity(raw_rows.len());
        for row in raw_rows {
            match normalize(row, self.config.allow_insecure_transport) {
                Ok(station) => candidates.push(station),
                Err(DropReason::NotCheckedOk) => stats.dropped_not_checked_ok += 1,
                Err(DropReason::UnusableUrl) => stats.dropped_unusable_url += 1,
                Err(DropReason::Insecure) => stats.dropped_insecure += 1,
                Err(DropReason::BlockedDomain) => stats.dropped_blocked_domain += 1,
            }
        }

        // A catalog that normalizes to nothing usable aborts the refresh
        // rather than publishing an empty payload over the previous one
        // (§4.7 failure semantics: partial fetch keeps previous state).
        if candidates.is_empty() {
            tracing::error!("refresh produced zero normalized stations; aborting, previous payload stays current");
            return Err(RefreshError::EmptyResult);
        }

        let stations = if self.config.stream_validation_enabled {
            let outcomes = validate_all(
                &self.client,
                &self.validation_cache,
                &candidates,
                self.config.stream_validation_concurrency,
                timeout,
                self.config.stream_validation_success_ttl_seconds,
                self.config.stream_validation_failure_ttl_seconds,
            )
            .await;

            candidates
                .into_iter()
                .zip(outcomes)
                .filter_map(|(mut station, outcome)| {
                    if !outcome.ok {
                        stats.rejected_by_validation += 1;
                        return None;
                    }
                    if let Some(final_url) = outcome.final_url {
                        station.stream_url = final_url;
                    }
                    if let Some(force_hls) = outcome.force_hls {
                        station.hls = station.hls || force_hls;
                    }
                    Some(station)
                })
                .collect::<Vec<_>>()
        } else {
            candidates
        };

        let fingerprint_value = fingerprint(&stations);
        let total = stations.len();
        let payload = StationsPayload {
            schema_version: crate::models::station::CURRENT_SCHEMA_VERSION,
            updated_at: ValidationCache::now_millis(),
            source: self.config.radio_browser_default_host.clone(),
            requests: vec![self.config.radio_browser_srv_name.clone()],
            total,
            fingerprint: fingerprint_value,
            stations,
        };

        stations::persist(&self.pool, &payload).await?;

        let index = ProcessedIndex::build(&payload);

        tracing::info!(
            fetched = stats.fetched,
            published = total,
            dropped_not_checked_ok = stats.dropped_not_checked_ok,
            dropped_unusable_url = stats.dropped_unusable_url,
            dropped_insecure = stats.dropped_insecure,
            dropped_blocked_domain = stats.dropped_blocked_domain,
            rejected_by_validation = stats.rejected_by_validation,
            "refresh cycle completed"
        );

        Ok(RefreshResult { payload: Arc::new(payload), index: Arc::new(index), stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_error_messages_are_distinguishable() {
        assert_ne!(RefreshError::AllHostsFailed.to_string(), RefreshError::LockHeld.to_string());
    }
}
