//! The gateway's single fallback handler: every request that isn't one of
//! the small fixed endpoints (`/session`, `/healthz`, `/internal/status`,
//! `/docs`) runs the full request lifecycle described in the system
//! overview: sanitize -> CORS -> session/CSRF -> route -> cache -> proxy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;

use crate::services::{cors::CorsDecision, proxy, response_cache::CacheEntry, router, sanitizer, session_manager::ValidateError};
use crate::AppState;

fn error_response(status: StatusCode, message: &str, cors_headers: HeaderMap) -> Response {
    let mut response = (status, Json(serde_json::json!({ "error": message }))).into_response();
    response.headers_mut().extend(cors_headers);
    response
}

pub async fn fallback(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());

    let cors_headers = match state.cors.decide(origin, &method) {
        CorsDecision::Allow(h) => h,
        CorsDecision::Deny => {
            return error_response(
                StatusCode::FORBIDDEN,
                "Origin not allowed",
                HeaderMap::new(),
            )
        }
    };

    if method == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        response
            .headers_mut()
            .extend(state.cors.preflight_headers(origin));
        return response;
    }

    if body.len() > state.config.max_request_body_bytes {
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large", cors_headers);
    }

    let raw_path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(uri.path());

    let parsed = match sanitizer::parse_request_url(raw_path_and_query) {
        Ok(url) => url,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, err.message(), cors_headers);
        }
    };

    let (service, raw_suffix) = match router::resolve_prefix(parsed.path()) {
        Ok(pair) => pair,
        Err(_) => return error_response(StatusCode::NOT_FOUND, "Not found", cors_headers),
    };

    let sanitized_suffix = match sanitizer::sanitize_path_suffix(&raw_suffix) {
        Ok(s) => s,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.message(), cors_headers),
    };

    let cookie_session_id = extract_cookie(&headers, &state.config.session_cookie_name);
    let proof_header = headers
        .get("x-gateway-csrf-proof")
        .and_then(|v| v.to_str().ok());
    let csrf_header = headers
        .get("x-gateway-csrf")
        .and_then(|v| v.to_str().ok());

    let session = match state
        .session_manager
        .validate(cookie_session_id.as_deref(), proof_header, csrf_header, &method)
        .await
    {
        Ok(session) => session,
        Err(ValidateError::SessionRequired | ValidateError::Expired) => {
            return error_response(StatusCode::UNAUTHORIZED, "Session required", cors_headers)
        }
        Err(ValidateError::CsrfMismatch) => {
            return error_response(
                StatusCode::FORBIDDEN,
                "Missing or invalid CSRF token",
                cors_headers,
            )
        }
        Err(ValidateError::InvalidProof) => {
            return error_response(
                StatusCode::FORBIDDEN,
                "Missing or invalid CSRF token",
                cors_headers,
            )
        }
    };

    let base_url = match service {
        router::Service::Radio => &state.config.radio_service_url,
        router::Service::Terminal => &state.config.terminal_service_url,
    };

    let target = match router::build_upstream_url(base_url, &sanitized_suffix, parsed.query()) {
        Ok(url) => url,
        Err(_) => return error_response(StatusCode::BAD_GATEWAY, "Upstream routing failed", cors_headers),
    };

    let cacheable = router::is_cacheable(service, &method, &sanitized_suffix);
    let cache_key = router::cache_key(service, &sanitized_suffix, parsed.query());

    if cacheable {
        if let Some(entry) = state.response_cache.get(&cache_key).await {
            let mut response = Response::builder().status(entry.status);
            for (k, v) in &entry.headers {
                response = response.header(k, v);
            }
            let mut response = response.body(axum::body::Body::from(entry.body)).unwrap();
            response.headers_mut().extend(cors_headers);
            response
                .headers_mut()
                .insert("x-cache", "HIT".parse().unwrap());
            return response;
        }
    }

    let outbound_headers = proxy::build_outbound_headers(
        &headers,
        Some(peer),
        &state.config.service_auth_token,
        Some(&session.nonce),
    );

    let timeout = Duration::from_millis(state.config.upstream_timeout_ms);
    match proxy::forward(&state.http_client, method, target, outbound_headers, body, timeout, cacheable).await {
        Ok(outcome) => {
            let mut response = Response::builder().status(outcome.status);
            for (k, v) in outcome.headers.iter() {
                response = response.header(k, v);
            }
            let mut response = response.body(outcome.body).unwrap();
            response.headers_mut().extend(cors_headers.clone());
            if cacheable {
                response
                    .headers_mut()
                    .insert("x-cache", "MISS".parse().unwrap());
            }

            if cacheable {
                if let Some(buffered) = outcome.buffered_body {
                    let content_type = outcome_content_type(response.headers());
                    let has_set_cookie = response.headers().get("set-cookie").is_some();
                    if crate::services::response_cache::ResponseCache::is_storable(
                        outcome.status.as_u16(),
                        content_type.as_deref(),
                        has_set_cookie,
                    ) {
                        let stored_headers: Vec<(String, String)> = response
                            .headers()
                            .iter()
                            .filter(|(k, _)| {
                                !matches!(k.as_str(), "set-cookie" | "content-length" | "x-cache")
                            })
                            .filter_map(|(k, v)| {
                                v.to_str().ok().map(|v| (k.to_string(), v.to_string()))
                            })
                            .collect();
                        let expires_at = chrono::Utc::now().timestamp_millis()
                            + state.response_cache.default_ttl_ms();
                        state
                            .response_cache
                            .store(
                                cache_key,
                                CacheEntry {
                                    status: outcome.status.as_u16(),
                                    headers: stored_headers,
                                    body: buffered.to_vec(),
                                    expires_at,
                                },
                            )
                            .await;
                    }
                }
            }

            response
        }
        Err(proxy::ProxyError::Timeout) => {
            error_response(StatusCode::GATEWAY_TIMEOUT, "Upstream timed out", cors_headers)
        }
        Err(proxy::ProxyError::Network(_)) => {
            error_response(StatusCode::BAD_GATEWAY, "Upstream request failed", cors_headers)
        }
    }
}

fn outcome_content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get("cookie")?.to_str().ok()?;
    raw.split(';').map(|s| s.trim()).find_map(|pair| {
        let mut parts = pair.splitn(2, '=');
        let key = parts.next()?.trim();
        if key != name {
            return None;
        }
        let value = parts.next()?.trim();
        if value.is_empty() {
            None
        } else {
            Some(value.to_string())
        }
    })
}
