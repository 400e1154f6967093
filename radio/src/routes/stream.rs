//! Stream and HLS playlist proxy routes (§4.10).

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use url::Url;

use crate::services::hls_proxy::{FetchOutcome, HlsError};
use crate::AppState;

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn hls_error_status(err: &HlsError) -> StatusCode {
    match err {
        HlsError::InvalidUrl(_) => StatusCode::BAD_REQUEST,
        HlsError::NotPlaylist => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        HlsError::OriginMismatch => StatusCode::FORBIDDEN,
        HlsError::Network(_) | HlsError::Status(_) => StatusCode::BAD_GATEWAY,
    }
}

/// `GET /stations/{id}/stream`: fetches the station's stream URL. If it
/// looks like an HLS playlist, rewrites every segment URI to route back
/// through `stream/segment` and returns the rewritten text; otherwise the
/// upstream response is passed through verbatim with its own content-type.
pub async fn playlist(State(state): State<Arc<AppState>>, Path(station_id): Path<String>) -> Response {
    let (payload, _) = state.current_snapshot().await;
    let station = match payload.stations.iter().find(|s| s.id == station_id) {
        Some(s) => s.clone(),
        None => return error_response(StatusCode::NOT_FOUND, "station not found"),
    };

    let timeout = Duration::from_millis(state.config.stream_proxy_timeout_ms);
    match state.hls_proxy.fetch(&station.stream_url, timeout).await {
        Ok(FetchOutcome::Playlist(text)) => {
            let mut response = text.into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, "application/vnd.apple.mpegurl".parse().unwrap());
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, "no-store".parse().unwrap());
            response
        }
        Ok(FetchOutcome::Passthrough(upstream)) => {
            let content_type = upstream
                .headers()
                .get(header::CONTENT_TYPE)
                .cloned()
                .unwrap_or_else(|| header::HeaderValue::from_static("application/octet-stream"));
            let stream = upstream.bytes_stream();
            let mut response = Response::new(Body::from_stream(stream));
            response.headers_mut().insert(header::CONTENT_TYPE, content_type);
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, "no-store".parse().unwrap());
            response
        }
        Err(err) => {
            tracing::warn!(station_id, error = %err, "stream proxy failed");
            error_response(hls_error_status(&err), "failed to fetch stream")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SegmentQuery {
    pub source: String,
}

/// `GET /stations/{id}/stream/segment?source=...`: proxies a single HLS
/// segment (or sub-playlist/key) byte-for-byte. `source` must resolve to
/// the same origin as the station's own stream URL and use `https`; this is
/// the SSRF pin that stops a rewritten playlist line from being replayed
/// against an arbitrary host once it reaches the client.
pub async fn segment(
    State(state): State<Arc<AppState>>,
    Path(station_id): Path<String>,
    Query(query): Query<SegmentQuery>,
    headers: HeaderMap,
) -> Response {
    let (payload, _) = state.current_snapshot().await;
    let station = match payload.stations.iter().find(|s| s.id == station_id) {
        Some(s) => s.clone(),
        None => return error_response(StatusCode::NOT_FOUND, "station not found"),
    };

    let source = match Url::parse(&query.source) {
        Ok(url) => url,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid segment source"),
    };
    let station_origin = match Url::parse(&station.stream_url) {
        Ok(url) => url.origin(),
        Err(_) => return error_response(StatusCode::BAD_GATEWAY, "station has no valid stream url"),
    };
    if source.scheme() != "https" || source.origin() != station_origin {
        return error_response(StatusCode::FORBIDDEN, "segment source origin mismatch");
    }

    let timeout = Duration::from_millis(state.config.stream_proxy_timeout_ms);
    let mut outbound = state.http_client.get(source.as_str()).timeout(timeout);
    for name in [header::RANGE, header::ACCEPT, header::USER_AGENT] {
        if let Some(value) = headers.get(&name) {
            outbound = outbound.header(name, value);
        }
    }

    let upstream = match outbound.send().await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(station_id, error = %err, "segment fetch failed");
            return error_response(StatusCode::BAD_GATEWAY, "segment fetch failed");
        }
    };

    if !upstream.status().is_success() {
        return error_response(StatusCode::BAD_GATEWAY, "segment upstream error");
    }

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    response_headers.remove(header::TRANSFER_ENCODING);
    let stream = upstream.bytes_stream();
    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_origin_must_match_station_stream_origin() {
        let source = Url::parse("https://attacker.example/evil.ts").unwrap();
        let station_origin = Url::parse("https://cdn.example.com/radio/playlist.m3u8").unwrap().origin();
        assert_ne!(source.origin(), station_origin);
    }

    #[test]
    fn segment_origin_matches_same_host() {
        let source = Url::parse("https://cdn.example.com/radio/seg-001.ts").unwrap();
        let station_origin = Url::parse("https://cdn.example.com/radio/playlist.m3u8").unwrap().origin();
        assert_eq!(source.origin(), station_origin);
    }
}
