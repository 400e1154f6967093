//! Upstream directory host rotation and catalog fetch (§4.7 steps 1-2).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::Client;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

use super::normalize::RawStationRow;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("response body did not parse: {0}")]
    Parse(String),
}

/// Round-robins across resolved hosts. The index is process-wide (spec §9
/// design note: "global mutable state... model them as explicit services"),
/// so it lives behind an `AtomicUsize` owned by `AppState` rather than a
/// bare static.
pub struct HostRotation {
    index: AtomicUsize,
}

impl HostRotation {
    pub fn new() -> Self {
        Self { index: AtomicUsize::new(0) }
    }

    /// Picks the next host deterministically (modular index over the
    /// resolved host list) and advances the rotation.
    pub fn next<'a>(&self, hosts: &'a [String]) -> &'a str {
        if hosts.is_empty() {
            return "";
        }
        let i = self.index.fetch_add(1, Ordering::Relaxed) % hosts.len();
        &hosts[i]
    }
}

impl Default for HostRotation {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves `_api._tcp.radio-browser.info` SRV records and unions them with
/// the default configured host. Falls back to just the default host if SRV
/// resolution fails or returns nothing.
pub async fn resolve_hosts(srv_name: &str, default_host: &str) -> Vec<String> {
    let mut hosts = vec![default_host.to_string()];

    let resolver = match TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()) {
        Ok(r) => r,
        Err(err) => {
            tracing::warn!(error = %err, "failed to construct DNS resolver; using default host only");
            return hosts;
        }
    };

    match resolver.srv_lookup(srv_name).await {
        Ok(lookup) => {
            for record in lookup.iter() {
                let target = record.target().to_utf8();
                let target = target.trim_end_matches('.');
                if target.is_empty() {
                    continue;
                }
                let host = format!("https://{target}");
                if !hosts.contains(&host) {
                    hosts.push(host);
                }
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, srv_name, "SRV lookup failed; using default host only");
        }
    }

    hosts
}

/// Fetches the station catalog from a single host. Callers rotate hosts and
/// retry on `FetchError`; only an all-hosts failure is fatal (§4.7, §7).
pub async fn fetch_catalog(
    client: &Client,
    host: &str,
    limit: Option<u32>,
    timeout: Duration,
) -> Result<Vec<RawStationRow>, FetchError> {
    let mut url = format!(
        "{}/json/stations?hidebroken=true&order=clickcount&reverse=true&lastcheckok=1&ssl_error=0",
        host.trim_end_matches('/')
    );
    if let Some(limit) = limit {
        url.push_str(&format!("&limit={limit}"));
    }

    let response = client
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| FetchError::Network(e.to_string()))?;

    if !response.status().is_success() {
        return Err(FetchError::Status(response.status().as_u16()));
    }

    response
        .json::<Vec<RawStationRow>>()
        .await
        .map_err(|e| FetchError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_cycles_through_hosts() {
        let rotation = HostRotation::new();
        let hosts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let picks: Vec<&str> = (0..6).map(|_| rotation.next(&hosts)).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn rotation_handles_empty_list() {
        let rotation = HostRotation::new();
        assert_eq!(rotation.next(&[]), "");
    }
}
