//! Health and operator routes: liveness probe and the bearer-authenticated
//! manual refresh trigger.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::db::health_check;
use crate::AppState;

pub async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let db_ok = health_check(&state.pool).await;
    let redis_ok = match &state.shared_redis {
        Some(redis) => redis.ping().await.unwrap_or(false),
        None => true,
    };
    let status = if db_ok { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(serde_json::json!({ "status": if db_ok { "ok" } else { "degraded" }, "database": db_ok, "redis": redis_ok })))
        .into_response()
}

pub async fn internal_status(State(state): State<Arc<AppState>>) -> Response {
    let (payload, _) = state.current_snapshot().await;
    Json(serde_json::json!({
        "uptimeSeconds": state.start_time.elapsed().as_secs(),
        "catalogTotal": payload.total,
        "catalogUpdatedAt": payload.updated_at,
        "catalogFingerprint": payload.fingerprint,
    }))
    .into_response()
}

fn is_authorized(headers: &HeaderMap, expected_token: &str) -> bool {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token == expected_token)
        .unwrap_or(false)
}

/// Triggers a manual refresh cycle (operator tooling). Bearer-authenticated
/// against `STATIONS_REFRESH_TOKEN` rather than the session/CSRF layer the
/// gateway owns, since this is a service-to-service operator endpoint.
pub async fn trigger_refresh(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if !is_authorized(&headers, &state.config.stations_refresh_token) {
        return (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": "invalid refresh token" }))).into_response();
    }

    match state.refresh.clone().refresh().await {
        Ok(result) => {
            state.publish(result.payload.clone(), result.index.clone()).await;
            Json(serde_json::json!({
                "status": "ok",
                "total": result.payload.total,
                "fingerprint": result.payload.fingerprint,
            }))
            .into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "manual refresh failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
        }
    }
}
