//! Streaming reverse proxy (C6): forwards sanitized headers, streams the
//! upstream body back to the client, and enforces a single request-wide
//! deadline.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use reqwest::Client;
use url::Url;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
    "proxy-authorization",
    "proxy-authenticate",
    "host",
    "content-length",
    "expect",
];

pub struct ProxyOutcome {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
    /// Populated only when the caller requested buffering for the response
    /// cache; `None` means the body was streamed straight through.
    pub buffered_body: Option<Bytes>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream timed out")]
    Timeout,
    #[error("upstream request failed: {0}")]
    Network(String),
}

fn derive_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    for name in ["cf-connecting-ip", "cf-connection-ip"] {
        if let Some(v) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if !v.trim().is_empty() {
                return normalize_ip(v.trim());
            }
        }
    }
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return normalize_ip(first);
            }
        }
    }
    peer.map(|p| normalize_ip(&p.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn normalize_ip(ip: &str) -> String {
    ip.strip_prefix("::ffff:")
        .map(|s| s.to_string())
        .unwrap_or_else(|| if ip == "::1" { "127.0.0.1".to_string() } else { ip.to_string() })
}

/// Builds the outbound header set: strips hop-by-hop headers, forces the
/// service bearer token, injects derived client-IP headers, and forwards the
/// session nonce.
pub fn build_outbound_headers(
    inbound: &HeaderMap,
    peer: Option<SocketAddr>,
    service_auth_token: &str,
    session_nonce: Option<&str>,
) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in inbound.iter() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        if name.as_str() == "authorization" {
            continue;
        }
        out.insert(name.clone(), value.clone());
    }

    if let Ok(v) = HeaderValue::from_str(&format!("Bearer {service_auth_token}")) {
        out.insert("authorization", v);
    }

    let client_ip = derive_client_ip(inbound, peer);
    if let Ok(v) = HeaderValue::from_str(&client_ip) {
        out.insert(HeaderName::from_static("cf-connecting-ip"), v.clone());
        out.insert(HeaderName::from_static("cf-connection-ip"), v.clone());
        out.insert(HeaderName::from_static("x-real-ip"), v.clone());
    }

    let existing_xff = inbound
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let already_present = existing_xff.split(',').any(|p| p.trim() == client_ip);
    let new_xff = if existing_xff.is_empty() {
        client_ip.clone()
    } else if already_present {
        existing_xff.to_string()
    } else {
        format!("{existing_xff}, {client_ip}")
    };
    if let Ok(v) = HeaderValue::from_str(&new_xff) {
        out.insert(HeaderName::from_static("x-forwarded-for"), v);
    }

    if let Some(nonce) = session_nonce {
        if let Ok(v) = HeaderValue::from_str(nonce) {
            out.insert(HeaderName::from_static("x-gateway-session"), v);
        }
    }

    out
}

/// Forwards the request, respecting a single timeout deadline. When
/// `buffer_for_cache` is set the whole body is read into memory so the
/// caller can both return it and persist it to the response cache; this
/// trades streaming for cacheable (bounded, JSON) responses only.
pub async fn forward(
    client: &Client,
    method: Method,
    target: Url,
    headers: HeaderMap,
    body: Bytes,
    timeout: Duration,
    buffer_for_cache: bool,
) -> Result<ProxyOutcome, ProxyError> {
    let reqwest_method =
        reqwest::Method::from_bytes(method.as_str().as_bytes()).unwrap_or(reqwest::Method::GET);

    let mut request = client.request(reqwest_method, target).timeout(timeout);
    for (name, value) in headers.iter() {
        if let Ok(v) = value.to_str() {
            request = request.header(name.as_str(), v);
        }
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let upstream = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ProxyError::Timeout
        } else {
            ProxyError::Network(e.to_string())
        }
    })?;

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers().iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            response_headers.insert(n, v);
        }
    }

    if buffer_for_cache {
        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| ProxyError::Network(e.to_string()))?;
        Ok(ProxyOutcome {
            status,
            headers: response_headers,
            body: Body::from(bytes.clone()),
            buffered_body: Some(bytes),
        })
    } else {
        let stream = upstream.bytes_stream();
        Ok(ProxyOutcome {
            status,
            headers: response_headers,
            body: Body::from_stream(stream),
            buffered_body: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut inbound = HeaderMap::new();
        inbound.insert("connection", HeaderValue::from_static("keep-alive"));
        inbound.insert("content-type", HeaderValue::from_static("application/json"));
        let out = build_outbound_headers(&inbound, None, "svc-token", None);
        assert!(out.get("connection").is_none());
        assert!(out.get("content-type").is_some());
    }

    #[test]
    fn authorization_is_overwritten() {
        let mut inbound = HeaderMap::new();
        inbound.insert("authorization", HeaderValue::from_static("Bearer client-value"));
        let out = build_outbound_headers(&inbound, None, "svc-token", None);
        assert_eq!(out.get("authorization").unwrap(), "Bearer svc-token");
    }

    #[test]
    fn normalizes_loopback_mapped_address() {
        assert_eq!(normalize_ip("::ffff:203.0.113.5"), "203.0.113.5");
        assert_eq!(normalize_ip("::1"), "127.0.0.1");
    }

    #[test]
    fn session_nonce_is_forwarded() {
        let inbound = HeaderMap::new();
        let out = build_outbound_headers(&inbound, None, "svc-token", Some("abc123"));
        assert_eq!(out.get("x-gateway-session").unwrap(), "abc123");
    }
}
