//! `GET /healthz` and `GET /internal/status` (C13 health probe, supplemented
//! with a minimal runtime-status endpoint per spec.md §6).

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::decide_cors;
use crate::AppState;

/// Pings the shared session store (when one is configured) and always
/// reports `ok`; the gateway is allowed to run without a shared store,
/// falling back to in-process sessions, so a missing store is not fatal
/// here the way it would be for a service that truly requires one.
pub async fn healthz(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let cors_headers = match decide_cors(&state, &headers, &axum::http::Method::GET) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    let redis_ok = match &state.shared_store {
        Some(store) => store.ping().await.unwrap_or(false),
        None => true,
    };

    let mut response = Json(serde_json::json!({
        "status": "ok",
        "sharedStore": redis_ok,
    }))
    .into_response();
    response.headers_mut().extend(cors_headers);
    response
}

pub async fn internal_status(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let cors_headers = match decide_cors(&state, &headers, &axum::http::Method::GET) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    let uptime = state.start_time.elapsed().as_secs();
    let mut response = Json(serde_json::json!({ "uptime": uptime })).into_response();
    response.headers_mut().extend(cors_headers);
    response
}
