//! Database row types mapping `stations`/`station_payloads` to and from the
//! in-memory `Station`/`StationsPayload` model.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::station::{Coordinates, Station};

#[derive(Debug, Clone, FromRow)]
pub struct PayloadRow {
    pub id: Uuid,
    pub schema_version: i32,
    pub source: String,
    pub requests: Vec<String>,
    pub total: i32,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StationRow {
    pub id: Uuid,
    pub payload_id: Uuid,
    pub station_id: String,
    pub name: String,
    pub stream_url: String,
    pub homepage: Option<String>,
    pub favicon: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub state: Option<String>,
    pub languages: Vec<String>,
    pub tags: Vec<String>,
    pub geo_lat: Option<f64>,
    pub geo_lon: Option<f64>,
    pub bitrate: Option<i32>,
    pub codec: Option<String>,
    pub hls: bool,
    pub is_online: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub click_count: i64,
    pub click_trend: i64,
    pub votes: i64,
}

impl From<StationRow> for Station {
    fn from(row: StationRow) -> Self {
        Station {
            id: row.station_id,
            name: row.name,
            stream_url: row.stream_url,
            homepage: row.homepage,
            favicon: row.favicon,
            country: row.country,
            country_code: row.country_code,
            state: row.state,
            languages: row.languages,
            tags: row.tags,
            coordinates: match (row.geo_lat, row.geo_lon) {
                (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
                _ => None,
            },
            bitrate: row.bitrate.map(|b| b.max(0) as u32),
            codec: row.codec,
            hls: row.hls,
            is_online: row.is_online,
            last_checked_at: row.last_checked_at.map(|t| t.timestamp_millis()),
            last_changed_at: row.last_changed_at.map(|t| t.timestamp_millis()),
            click_count: row.click_count,
            click_trend: row.click_trend,
            votes: row.votes,
        }
    }
}

fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// An insert-ready row derived from a `Station`, bound positionally in
/// `repository::stations::persist`'s batched insert.
pub struct NewStationRow {
    pub station_id: String,
    pub name: String,
    pub stream_url: String,
    pub homepage: Option<String>,
    pub favicon: Option<String>,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub state: Option<String>,
    pub languages: Vec<String>,
    pub tags: Vec<String>,
    pub geo_lat: Option<f64>,
    pub geo_lon: Option<f64>,
    pub bitrate: Option<i32>,
    pub codec: Option<String>,
    pub hls: bool,
    pub is_online: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_changed_at: Option<DateTime<Utc>>,
    pub click_count: i64,
    pub click_trend: i64,
    pub votes: i64,
}

impl From<&Station> for NewStationRow {
    fn from(s: &Station) -> Self {
        NewStationRow {
            station_id: s.id.clone(),
            name: s.name.clone(),
            stream_url: s.stream_url.clone(),
            homepage: s.homepage.clone(),
            favicon: s.favicon.clone(),
            country: s.country.clone(),
            country_code: s.country_code.clone(),
            state: s.state.clone(),
            languages: s.languages.clone(),
            tags: s.tags.clone(),
            geo_lat: s.coordinates.as_ref().map(|c| c.lat),
            geo_lon: s.coordinates.as_ref().map(|c| c.lon),
            bitrate: s.bitrate.map(|b| b as i32),
            codec: s.codec.clone(),
            hls: s.hls,
            is_online: s.is_online,
            last_checked_at: s.last_checked_at.and_then(millis_to_datetime),
            last_changed_at: s.last_changed_at.and_then(millis_to_datetime),
            click_count: s.click_count,
            click_trend: s.click_trend,
            votes: s.votes,
        }
    }
}
