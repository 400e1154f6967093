//! Station catalog query engine (§4.9): filters the currently published
//! payload by country/language/tag/genre/free-text search, then paginates.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::models::station::ProjectedStation;
use crate::services::click_notifier;
use crate::AppState;

/// `limit` arrives either as an integer or the literal `"all"` (§4.9); a
/// manual `Deserialize` keeps the query struct `deny_unknown_fields`-strict
/// while accepting both shapes.
#[derive(Debug, Clone, Copy)]
enum LimitParam {
    Value(usize),
    All,
}

impl<'de> Deserialize<'de> for LimitParam {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        if raw.eq_ignore_ascii_case("all") {
            Ok(LimitParam::All)
        } else {
            raw.parse::<usize>().map(LimitParam::Value).map_err(serde::de::Error::custom)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct StationsQuery {
    pub refresh: Option<bool>,
    pub limit: Option<LimitParam>,
    pub offset: Option<usize>,
    pub page: Option<usize>,
    pub country: Option<String>,
    pub language: Option<String>,
    pub tag: Option<String>,
    pub genre: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationsMeta {
    pub total: usize,
    pub filtered: usize,
    pub matches: usize,
    pub has_more: bool,
    pub page: usize,
    pub limit: usize,
    pub max_limit: usize,
    pub requested_limit: Option<usize>,
    pub offset: usize,
    pub cache_source: &'static str,
    pub origin: String,
    pub updated_at: i64,
    pub countries: Vec<String>,
    pub genres: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationsResponse {
    pub meta: StationsMeta,
    pub items: Vec<ProjectedStation>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

/// Builds the candidate index set from the `country`/`language`/`tag`/`genre`
/// filters, intersecting smallest-set-first (§4.9). `None` means "no
/// positional filters set"; the caller falls back to the full catalog.
fn candidate_set(index: &crate::models::station::ProcessedIndex, query: &StationsQuery) -> Option<Vec<usize>> {
    let mut sets: Vec<&Vec<usize>> = Vec::new();

    if let Some(country) = &query.country {
        let key = country.to_ascii_lowercase();
        match index.by_country.get(&key) {
            Some(ids) => sets.push(ids),
            None => return Some(Vec::new()),
        }
    }
    if let Some(language) = &query.language {
        match index.by_language.get(&language.to_ascii_lowercase()) {
            Some(ids) => sets.push(ids),
            None => return Some(Vec::new()),
        }
    }
    if let Some(tag) = &query.tag {
        match index.by_tag.get(&tag.to_ascii_lowercase()) {
            Some(ids) => sets.push(ids),
            None => return Some(Vec::new()),
        }
    }
    if let Some(genre) = &query.genre {
        match index.by_tag.get(&genre.to_ascii_lowercase()) {
            Some(ids) => sets.push(ids),
            None => return Some(Vec::new()),
        }
    }

    if sets.is_empty() {
        return None;
    }

    sets.sort_by_key(|s| s.len());
    let mut intersection: std::collections::BTreeSet<usize> = sets[0].iter().copied().collect();
    for set in &sets[1..] {
        let other: std::collections::HashSet<usize> = set.iter().copied().collect();
        intersection.retain(|idx| other.contains(idx));
    }
    Some(intersection.into_iter().collect())
}

pub async fn list(State(state): State<Arc<AppState>>, Query(query): Query<StationsQuery>) -> Response {
    let (payload, index) = state.current_snapshot().await;

    let max_limit = state.config.api_max_page_size;
    let requested_limit = match query.limit {
        Some(LimitParam::Value(v)) => Some(v),
        Some(LimitParam::All) => Some(max_limit),
        None => None,
    };
    // `limit=0` and an absent `limit` both fall back to the configured
    // default; anything else is clamped into `[1, maxLimit]` (§8 boundary).
    let limit = match requested_limit {
        Some(0) | None => state.config.api_default_page_size,
        Some(v) => v,
    }
    .clamp(1, max_limit);

    // `page=0` is treated as 1; `offset` wins over `page` when both are set.
    let page = query.page.unwrap_or(1).max(1);
    let offset = query.offset.unwrap_or_else(|| (page - 1) * limit);

    let mut candidates: Vec<usize> = match candidate_set(&index, &query) {
        Some(set) => set,
        None => (0..payload.stations.len()).collect(),
    };
    let filtered = candidates.len();

    if let Some(search) = &query.search {
        let needle = search.trim().to_ascii_lowercase();
        if !needle.is_empty() {
            candidates.retain(|&idx| index.search_texts.get(idx).map(|t| t.contains(&needle)).unwrap_or(false));
        }
    }

    candidates.sort_by(|&a, &b| payload.stations[b].click_count.cmp(&payload.stations[a].click_count));

    let matches = candidates.len();
    let has_more = offset + limit < matches;
    let page_ids = candidates.into_iter().skip(offset).take(limit);
    let items: Vec<ProjectedStation> = page_ids.map(|idx| ProjectedStation::from(&payload.stations[idx])).collect();

    Json(StationsResponse {
        meta: StationsMeta {
            total: payload.total,
            filtered,
            matches,
            has_more,
            page,
            limit,
            max_limit,
            requested_limit,
            offset,
            cache_source: "memory",
            origin: payload.source.clone(),
            updated_at: payload.updated_at,
            countries: index.countries.clone(),
            genres: index.genres.clone(),
        },
        items,
    })
    .into_response()
}

pub async fn meta(State(state): State<Arc<AppState>>) -> Response {
    let (payload, index) = state.current_snapshot().await;
    Json(serde_json::json!({
        "updatedAt": payload.updated_at,
        "fingerprint": payload.fingerprint,
        "total": payload.total,
        "countries": index.countries,
        "genres": index.genres,
    }))
    .into_response()
}

pub async fn get_one(State(state): State<Arc<AppState>>, Path(station_id): Path<String>) -> Response {
    let (payload, _) = state.current_snapshot().await;
    match payload.stations.iter().find(|s| s.id == station_id) {
        Some(station) => Json(ProjectedStation::from(station)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "station not found"),
    }
}

pub async fn click(State(state): State<Arc<AppState>>, Path(station_id): Path<String>) -> Response {
    let (payload, _) = state.current_snapshot().await;
    if !payload.stations.iter().any(|s| s.id == station_id) {
        return error_response(StatusCode::NOT_FOUND, "station not found");
    }
    click_notifier::notify(state.http_client.clone(), state.config.radio_browser_default_host.clone(), station_id);
    StatusCode::ACCEPTED.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::station::{ProcessedIndex, Station, StationsPayload};

    fn station(id: &str, country: &str, tags: &[&str], clicks: i64) -> Station {
        Station {
            id: id.to_string(),
            name: format!("Station {id}"),
            stream_url: "https://example.com/stream".to_string(),
            homepage: None,
            favicon: None,
            country: Some(country.to_string()),
            country_code: None,
            state: None,
            languages: vec!["english".to_string()],
            tags: tags.iter().map(|t| t.to_string()).collect(),
            coordinates: None,
            bitrate: None,
            codec: None,
            hls: false,
            is_online: true,
            last_checked_at: None,
            last_changed_at: None,
            click_count: clicks,
            click_trend: 0,
            votes: 0,
        }
    }

    fn payload() -> StationsPayload {
        StationsPayload {
            schema_version: crate::models::station::CURRENT_SCHEMA_VERSION,
            updated_at: 1000,
            source: "radio-browser".into(),
            requests: vec![],
            total: 3,
            fingerprint: "x".into(),
            stations: vec![
                station("a", "DE", &["jazz"], 10),
                station("b", "FR", &["jazz", "rock"], 30),
                station("c", "DE", &["rock"], 20),
            ],
        }
    }

    #[test]
    fn candidate_set_intersects_country_and_tag() {
        let p = payload();
        let index = ProcessedIndex::build(&p);
        let query = StationsQuery {
            refresh: None,
            limit: None,
            offset: None,
            page: None,
            country: Some("DE".into()),
            language: None,
            tag: Some("rock".into()),
            genre: None,
            search: None,
        };
        let set = candidate_set(&index, &query).unwrap();
        assert_eq!(set, vec![2]);
    }

    #[test]
    fn genre_filter_reuses_tag_index() {
        let p = payload();
        let index = ProcessedIndex::build(&p);
        let query = StationsQuery {
            refresh: None,
            limit: None,
            offset: None,
            page: None,
            country: None,
            language: None,
            tag: None,
            genre: Some("jazz".into()),
            search: None,
        };
        let mut set = candidate_set(&index, &query).unwrap();
        set.sort();
        assert_eq!(set, vec![0, 1]);
    }

    #[test]
    fn unknown_country_short_circuits_to_empty() {
        let p = payload();
        let index = ProcessedIndex::build(&p);
        let query = StationsQuery {
            refresh: None,
            limit: None,
            offset: None,
            page: None,
            country: Some("ZZ".into()),
            language: None,
            tag: None,
            genre: None,
            search: None,
        };
        assert_eq!(candidate_set(&index, &query), Some(Vec::new()));
    }
}
