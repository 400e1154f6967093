//! Favorites routes (§4.11): list/put/delete, scoped to the caller's
//! session token forwarded by the gateway.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::favorites::MAX_SLOTS;
use crate::models::station::ProjectedStation;
use crate::services::favorites::FavoritesError;
use crate::AppState;

const SESSION_HEADER: &str = "x-gateway-session";

lazy_static! {
    static ref SESSION_TOKEN_SHAPE: Regex = Regex::new(r"^[A-Za-z0-9_-]{16,128}$").unwrap();
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FavoritesMeta {
    max_slots: usize,
}

#[derive(Debug, Serialize)]
struct FavoritesResponse {
    meta: FavoritesMeta,
    items: Vec<ProjectedStation>,
}

impl From<crate::models::favorites::FavoritesRecord> for FavoritesResponse {
    fn from(record: crate::models::favorites::FavoritesRecord) -> Self {
        Self {
            meta: FavoritesMeta { max_slots: MAX_SLOTS },
            items: record.entries.into_iter().filter_map(|e| e.snapshot).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PutQuery {
    pub slot: Option<usize>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn session_token(headers: &HeaderMap) -> Option<&str> {
    let token = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())?;
    SESSION_TOKEN_SHAPE.is_match(token).then_some(token)
}

fn no_store(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert("cache-control", HeaderValue::from_static("private, no-store"));
    response
}

pub async fn list(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let token = match session_token(&headers) {
        Some(t) => t,
        None => return error_response(StatusCode::UNAUTHORIZED, "missing or malformed session token"),
    };
    let (payload, _) = state.current_snapshot().await;
    let projections: Vec<ProjectedStation> = payload.stations.iter().map(ProjectedStation::from).collect();
    let record = state.favorites.reconcile(token, &projections).await;
    no_store(Json(FavoritesResponse::from(record)).into_response())
}

pub async fn put(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(station_id): Path<String>,
    Query(query): Query<PutQuery>,
) -> Response {
    let token = match session_token(&headers) {
        Some(t) => t,
        None => return error_response(StatusCode::UNAUTHORIZED, "missing or malformed session token"),
    };

    let (payload, _) = state.current_snapshot().await;
    let snapshot = payload.stations.iter().find(|s| s.id == station_id).map(ProjectedStation::from);
    if snapshot.is_none() {
        return error_response(StatusCode::NOT_FOUND, "station not found");
    }

    let now = crate::services::validation_cache::ValidationCache::now_millis();
    let result = match query.slot {
        Some(slot) => state.favorites.put_at_slot(token, &station_id, slot, snapshot, now).await,
        None => state.favorites.put(token, &station_id, snapshot, now).await,
    };

    match result {
        Ok(record) => no_store(Json(FavoritesResponse::from(record)).into_response()),
        Err(FavoritesError::Full) => error_response(StatusCode::CONFLICT, "favorites list is full"),
    }
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(station_id): Path<String>,
) -> Response {
    let token = match session_token(&headers) {
        Some(t) => t,
        None => return error_response(StatusCode::UNAUTHORIZED, "missing or malformed session token"),
    };
    let record = state.favorites.remove(token, &station_id).await;
    no_store(Json(FavoritesResponse::from(record)).into_response())
}
