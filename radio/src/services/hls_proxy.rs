//! HLS playlist proxy (§4.10): fetches an `.m3u8` playlist, rewrites every
//! segment/variant URI to route back through this service, and pins every
//! rewritten URI to the playlist's own origin so a compromised or
//! malicious playlist can't redirect playback through an arbitrary host.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum HlsError {
    #[error("invalid playlist url: {0}")]
    InvalidUrl(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("response is not an HLS playlist")]
    NotPlaylist,
    #[error("playlist references a segment outside its own origin")]
    OriginMismatch,
}

lazy_static! {
    static ref URI_ATTR: Regex = Regex::new(r#"URI="([^"]+)""#).unwrap();
}

pub fn looks_like_playlist(content_type: &str, url: &Url) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.contains("mpegurl") || url.path().ends_with(".m3u8")
}

/// Outcome of fetching a station's stream URL (§4.10): either a rewritten
/// `.m3u8` playlist ready to hand back verbatim, or a non-playlist response
/// that should be passed through to the client unmodified, body and all.
pub enum FetchOutcome {
    Playlist(String),
    Passthrough(reqwest::Response),
}

#[derive(Clone)]
pub struct HlsProxy {
    client: Client,
    segment_proxy_base: String,
}

impl HlsProxy {
    pub fn new(client: Client, segment_proxy_base: impl Into<String>) -> Self {
        Self { client, segment_proxy_base: segment_proxy_base.into() }
    }

    /// Fetches `stream_url` and, if it looks like an HLS playlist (by
    /// content-type or `.m3u8` path), rewrites every segment/variant/key URI
    /// to route back through `{segment_proxy_base}?source=...`. Any other
    /// content type is returned as-is for the caller to stream through.
    pub async fn fetch(&self, stream_url: &str, timeout: Duration) -> Result<FetchOutcome, HlsError> {
        let base = Url::parse(stream_url).map_err(|e| HlsError::InvalidUrl(e.to_string()))?;

        let response = self
            .client
            .get(base.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| HlsError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HlsError::Status(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let final_url = response.url().clone();
        if !looks_like_playlist(&content_type, &final_url) {
            return Ok(FetchOutcome::Passthrough(response));
        }

        let text = response.text().await.map_err(|e| HlsError::Network(e.to_string()))?;
        rewrite_playlist(&text, &final_url, &self.segment_proxy_base).map(FetchOutcome::Playlist)
    }
}

fn proxy_uri(resolved: &Url, segment_proxy_base: &str) -> String {
    format!("{segment_proxy_base}?source={}", urlencoding::encode(resolved.as_str()))
}

fn rewrite_playlist(text: &str, base: &Url, segment_proxy_base: &str) -> Result<String, HlsError> {
    let mut out = String::with_capacity(text.len());

    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.starts_with('#') {
            if URI_ATTR.is_match(trimmed) {
                let rewritten = rewrite_uri_attr(trimmed, base, segment_proxy_base)?;
                out.push_str(&rewritten);
            } else {
                out.push_str(trimmed);
            }
        } else if trimmed.is_empty() {
            out.push_str(trimmed);
        } else {
            let resolved = base.join(trimmed).map_err(|_| HlsError::InvalidUrl(trimmed.to_string()))?;
            if resolved.origin() != base.origin() {
                return Err(HlsError::OriginMismatch);
            }
            out.push_str(&proxy_uri(&resolved, segment_proxy_base));
        }
        out.push('\n');
    }

    Ok(out)
}

fn rewrite_uri_attr(line: &str, base: &Url, segment_proxy_base: &str) -> Result<String, HlsError> {
    let captures = URI_ATTR.captures(line).expect("caller verified URI_ATTR matches");
    let raw_uri = &captures[1];
    let resolved = base.join(raw_uri).map_err(|_| HlsError::InvalidUrl(raw_uri.to_string()))?;
    if resolved.origin() != base.origin() {
        return Err(HlsError::OriginMismatch);
    }
    let replacement = format!(r#"URI="{}""#, proxy_uri(&resolved, segment_proxy_base));
    Ok(URI_ATTR.replace(line, replacement.as_str()).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_relative_segment_uris() {
        let base = Url::parse("https://cdn.example.com/radio/playlist.m3u8").unwrap();
        let playlist = "#EXTM3U\n#EXTINF:10,\nsegment1.ts\n#EXTINF:10,\nsegment2.ts\n";
        let rewritten = rewrite_playlist(playlist, &base, "stream/segment").unwrap();
        assert!(rewritten.contains("stream/segment?source=https%3A%2F%2Fcdn.example.com%2Fradio%2Fsegment1.ts"));
        assert!(!rewritten.contains("/stream/segment?source="));
    }

    #[test]
    fn rejects_cross_origin_segment() {
        let base = Url::parse("https://cdn.example.com/radio/playlist.m3u8").unwrap();
        let playlist = "#EXTM3U\nhttps://attacker.example/evil.ts\n";
        let err = rewrite_playlist(playlist, &base, "stream/segment").unwrap_err();
        assert!(matches!(err, HlsError::OriginMismatch));
    }

    #[test]
    fn rewrites_uri_attribute_tags() {
        let base = Url::parse("https://cdn.example.com/radio/playlist.m3u8").unwrap();
        let playlist = r#"#EXTM3U
#EXT-X-KEY:METHOD=AES-128,URI="key.bin"
segment1.ts
"#;
        let rewritten = rewrite_playlist(playlist, &base, "stream/segment").unwrap();
        assert!(rewritten.contains("URI=\"stream/segment?source="));
    }

    #[test]
    fn detects_playlist_by_extension_when_content_type_missing() {
        let url = Url::parse("https://cdn.example.com/a/b.m3u8").unwrap();
        assert!(looks_like_playlist("", &url));
    }
}
