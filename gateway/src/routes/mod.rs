//! Route handlers for the small set of fixed endpoints that live outside
//! the proxy fallback (`/session`, `/healthz`, `/internal/status`, `/docs`).
//! These apply the same CORS decision (C2) as the fallback handler, just
//! inline rather than through the full request lifecycle.

use std::sync::Arc;

use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::services::cors::CorsDecision;
use crate::AppState;

pub mod docs;
pub mod health;
pub mod proxy;
pub mod session;

/// Decides CORS for a fixed (non-proxied) route. `Ok` carries the headers to
/// merge onto the eventual response; `Err` is a ready-to-return 403.
pub fn decide_cors(state: &AppState, headers: &HeaderMap, method: &Method) -> Result<HeaderMap, Response> {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    match state.cors.decide(origin, method) {
        CorsDecision::Allow(h) => Ok(h),
        CorsDecision::Deny => Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "Origin not allowed" })),
        )
            .into_response()),
    }
}

/// Shared `OPTIONS` preflight handler, reused by every fixed route.
pub async fn preflight(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let origin = headers.get("origin").and_then(|v| v.to_str().ok());
    let mut response = StatusCode::NO_CONTENT.into_response();
    response.headers_mut().extend(state.cors.preflight_headers(origin));
    response
}
