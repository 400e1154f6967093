//! `POST /session` (C3 issue) plus the 405 fallback for other verbs on the
//! same path.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use super::decide_cors;
use crate::models::session::SessionResponse;
use crate::AppState;

/// `POST /session` → issues a session, sets the cookie, and returns the
/// CSRF token/proof the client needs to echo back on state-mutating calls.
pub async fn create(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let cors_headers = match decide_cors(&state, &headers, &Method::POST) {
        Ok(h) => h,
        Err(resp) => return resp,
    };

    let session = match state.session_manager.issue().await {
        Ok(session) => session,
        Err(err) => {
            tracing::error!(error = %err, "failed to issue session");
            let mut resp = (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Internal server error" })),
            )
                .into_response();
            resp.headers_mut().extend(cors_headers);
            return resp;
        }
    };

    let body = Json(SessionResponse {
        csrf_token: session.nonce.clone(),
        csrf_proof: session.csrf_proof.clone(),
        expires_at: session.expires_at,
    });

    let mut response = (StatusCode::OK, body).into_response();
    response.headers_mut().extend(cors_headers);

    let max_age = state.config.session_max_age_seconds.max(0);
    let cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; Secure; SameSite=Strict",
        state.session_manager.cookie_name, session.id, max_age
    );
    if let Ok(v) = HeaderValue::from_str(&cookie) {
        response.headers_mut().insert("set-cookie", v);
    }

    response
}

/// Any other verb on `/session` is rejected outright.
pub async fn method_not_allowed(State(state): State<Arc<AppState>>, headers: HeaderMap, method: Method) -> Response {
    let cors_headers = match decide_cors(&state, &headers, &method) {
        Ok(h) => h,
        Err(resp) => return resp,
    };
    let mut response = (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(serde_json::json!({ "error": "Method not allowed" })),
    )
        .into_response();
    response.headers_mut().extend(cors_headers);
    response
}
