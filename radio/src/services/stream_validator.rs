//! Stream validation (§4.7 step 4, §4.8): probes each candidate station's
//! stream URL with a bounded-concurrency worker pool, reusing cached
//! verdicts when still fresh and deduplicating in-flight probes against
//! identical stream URLs.

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};

use crate::models::station::Station;
use crate::services::normalize::is_blocklisted;
use crate::services::validation_cache::{ValidationCache, ValidationCacheEntry};

const ACCEPTED_CONTENT_TYPES: &[&str] = &[
    "audio/",
    "video/",
    "application/ogg",
    "application/x-mpegurl",
    "application/vnd.apple.mpegurl",
    "application/octet-stream",
];

/// Reason taxonomy reported alongside a rejected outcome (§4.8).
pub const REASON_NETWORK: &str = "network";
pub const REASON_TIMEOUT: &str = "timeout";
pub const REASON_BLOCKED_DOMAIN: &str = "blocked-domain";
pub const REASON_INSECURE_REDIRECT: &str = "insecure-redirect";
pub const REASON_UNEXPECTED_CONTENT_TYPE: &str = "unexpected-content-type";
pub const REASON_EMPTY_RESPONSE: &str = "empty-response";

fn status_reason(code: u16) -> String {
    format!("status-{code}")
}

#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub ok: bool,
    pub reason: Option<String>,
    pub final_url: Option<String>,
    pub force_hls: Option<bool>,
}

impl ValidationOutcome {
    fn rejected(reason: &str) -> Self {
        Self { ok: false, reason: Some(reason.to_string()), final_url: None, force_hls: None }
    }

    fn accepted(final_url: String, force_hls: bool) -> Self {
        Self { ok: true, reason: None, final_url: Some(final_url), force_hls: Some(force_hls) }
    }

    fn from_cache(entry: &ValidationCacheEntry) -> Self {
        Self {
            ok: entry.ok,
            reason: entry.reason.clone(),
            final_url: entry.final_url.clone(),
            force_hls: entry.force_hls,
        }
    }
}

/// Probes a single stream URL with a ranged GET, accepting 2xx/206
/// responses whose content-type matches an audio/HLS playlist signature.
/// A redirect landing anywhere off `https` is rejected as `insecure-redirect`
/// regardless of host, since the final URL is persisted into the catalog and
/// every `streamUrl` must stay HTTPS (§3/§8 invariant).
async fn probe(client: &Client, stream_url: &str, timeout: Duration) -> ValidationOutcome {
    let parsed = match url::Url::parse(stream_url) {
        Ok(u) => u,
        Err(_) => return ValidationOutcome::rejected(REASON_NETWORK),
    };
    let origin_host = parsed.host_str().map(|h| h.to_ascii_lowercase());
    if origin_host.as_deref().is_some_and(is_blocklisted) {
        return ValidationOutcome::rejected(REASON_BLOCKED_DOMAIN);
    }

    let response = client
        .get(stream_url)
        .header("Range", "bytes=0-4095")
        .header("Accept", "*/*")
        .timeout(timeout)
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(e) if e.is_timeout() => return ValidationOutcome::rejected(REASON_TIMEOUT),
        Err(_) => return ValidationOutcome::rejected(REASON_NETWORK),
    };

    let final_url = response.url().clone();
    if final_url.scheme() != "https" {
        return ValidationOutcome::rejected(REASON_INSECURE_REDIRECT);
    }
    if let Some(final_host) = final_url.host_str() {
        if is_blocklisted(final_host) {
            return ValidationOutcome::rejected(REASON_BLOCKED_DOMAIN);
        }
    }

    let status = response.status();
    if !status.is_success() && status != StatusCode::PARTIAL_CONTENT {
        return ValidationOutcome::rejected(&status_reason(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    let looks_like_playlist = content_type.contains("mpegurl") || final_url.path().ends_with(".m3u8");
    let accepted = ACCEPTED_CONTENT_TYPES.iter().any(|prefix| content_type.starts_with(prefix)) || looks_like_playlist;
    if !content_type.is_empty() && !accepted {
        return ValidationOutcome::rejected(REASON_UNEXPECTED_CONTENT_TYPE);
    }

    let mut bytes_stream = response.bytes_stream();
    let body_is_empty = match bytes_stream.next().await {
        Some(Ok(chunk)) => chunk.is_empty(),
        _ => true,
    };
    if body_is_empty && !looks_like_playlist {
        return ValidationOutcome::rejected(REASON_EMPTY_RESPONSE);
    }

    ValidationOutcome::accepted(final_url.to_string(), looks_like_playlist)
}

/// Validates every station's stream URL, preserving input order in the
/// returned vector. Identical stream URLs probe once and fan the verdict
/// out to every station that shares it.
pub async fn validate_all(
    client: &Client,
    cache: &ValidationCache,
    stations: &[Station],
    concurrency: usize,
    timeout: Duration,
    success_ttl_seconds: i64,
    failure_ttl_seconds: i64,
) -> Vec<ValidationOutcome> {
    let mut unique_urls: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for station in stations {
        if seen.insert(station.stream_url.clone()) {
            unique_urls.push(station.stream_url.clone());
        }
    }

    let last_changed: HashMap<&str, Option<i64>> =
        stations.iter().map(|s| (s.stream_url.as_str(), s.last_changed_at)).collect();

    let results: Vec<(String, ValidationOutcome)> = stream::iter(unique_urls.into_iter())
        .map(|stream_url| {
            let client = client.clone();
            let cache = cache.clone();
            let last_changed_at = last_changed.get(stream_url.as_str()).copied().flatten();
            async move {
                let signature = ValidationCacheEntry::signature_for(&stream_url, last_changed_at);
                let now = ValidationCache::now_millis();
                if let Some(entry) = cache.get(&stream_url).await {
                    if entry.is_fresh(now, &signature) {
                        return (stream_url, ValidationOutcome::from_cache(&entry));
                    }
                }

                let outcome = probe(&client, &stream_url, timeout).await;
                let ttl = if outcome.ok { success_ttl_seconds } else { failure_ttl_seconds };
                cache
                    .put(
                        &stream_url,
                        ValidationCacheEntry {
                            ok: outcome.ok,
                            validated_at: now,
                            signature,
                            ttl_seconds: ttl,
                            final_url: outcome.final_url.clone(),
                            force_hls: outcome.force_hls,
                            reason: outcome.reason.clone(),
                        },
                    )
                    .await;
                (stream_url, outcome)
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let by_url: HashMap<String, ValidationOutcome> = results.into_iter().collect();

    stations
        .iter()
        .map(|s| by_url.get(&s.stream_url).cloned().unwrap_or_else(|| ValidationOutcome::rejected(REASON_NETWORK)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reason_formats_code() {
        assert_eq!(status_reason(503), "status-503");
    }

    #[test]
    fn rejected_outcome_has_no_final_url() {
        let outcome = ValidationOutcome::rejected(REASON_TIMEOUT);
        assert!(!outcome.ok);
        assert_eq!(outcome.reason.as_deref(), Some(REASON_TIMEOUT));
        assert!(outcome.final_url.is_none());
    }

    #[test]
    fn accepted_outcome_carries_final_url_and_hls_flag() {
        let outcome = ValidationOutcome::accepted("https://x/stream".to_string(), true);
        assert!(outcome.ok);
        assert_eq!(outcome.force_hls, Some(true));
    }
}
