//! Normalization (§4.7 step 3, design note #4): coerces loosely-typed
//! upstream directory rows into the strict `Station` schema, applying the
//! HTTPS/blocklist/`lastcheckok` gates. Rows that fail coercion are dropped
//! rather than carried through with `null`/default placeholders.

use serde::Deserialize;

use crate::models::station::{Coordinates, Station};

/// Hosts known to serve broken or abusive streams; any stream resolving to
/// one of these (or a subdomain) is rejected regardless of upstream status.
pub const HOST_BLOCKLIST: &[&str] = &["stream-scammer.example", "broken-radio.example"];

pub fn is_blocklisted(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    HOST_BLOCKLIST
        .iter()
        .any(|blocked| host == *blocked || host.ends_with(&format!(".{blocked}")))
}

/// Accepts `"1"`/`1`/`true` as truthy the way the upstream directory's
/// loosely-typed JSON does (design note #4: numeric fields sometimes arrive
/// as strings).
fn de_bool_loose<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Bool(bool),
        Int(i64),
        Str(String),
    }
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Bool(b) => b,
        Loose::Int(i) => i != 0,
        Loose::Str(s) => matches!(s.as_str(), "1" | "true" | "TRUE" | "True"),
    })
}

fn de_u32_loose<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Num(f64),
        Str(String),
    }
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Num(n) => n.max(0.0) as u32,
        Loose::Str(s) => s.trim().parse::<f64>().unwrap_or(0.0).max(0.0) as u32,
    })
}

fn de_i64_loose<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Num(f64),
        Str(String),
    }
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Num(n) => n as i64,
        Loose::Str(s) => s.trim().parse::<f64>().unwrap_or(0.0) as i64,
    })
}

fn de_f64_opt_loose<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Num(f64),
        Str(String),
        Null,
    }
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Num(n) => Some(n),
        Loose::Str(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    })
}

/// Raw row shape from the upstream directory's `/json/stations` endpoint.
/// Deliberately loose: several numeric fields arrive as JSON strings.
#[derive(Debug, Deserialize)]
pub struct RawStationRow {
    pub stationuuid: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub url_resolved: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(default)]
    pub favicon: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub countrycode: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub tags: String,
    #[serde(default, deserialize_with = "de_f64_opt_loose")]
    pub geo_lat: Option<f64>,
    #[serde(default, deserialize_with = "de_f64_opt_loose")]
    pub geo_long: Option<f64>,
    #[serde(default, deserialize_with = "de_u32_loose")]
    pub bitrate: u32,
    #[serde(default)]
    pub codec: String,
    #[serde(default, deserialize_with = "de_bool_loose")]
    pub hls: bool,
    #[serde(default, deserialize_with = "de_bool_loose")]
    pub lastcheckok: bool,
    #[serde(default)]
    pub lastchecktime_iso8601: Option<String>,
    #[serde(default)]
    pub lastchangetime_iso8601: Option<String>,
    #[serde(default, deserialize_with = "de_i64_loose")]
    pub clickcount: i64,
    #[serde(default, deserialize_with = "de_i64_loose")]
    pub clicktrend: i64,
    #[serde(default, deserialize_with = "de_i64_loose")]
    pub votes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotCheckedOk,
    UnusableUrl,
    Insecure,
    BlockedDomain,
}

fn parse_iso8601_millis(s: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Normalizes a single raw row. `allow_http_upgrade` controls whether a
/// plain `http://` stream URL is rewritten to `https://` (true) or the row
/// is dropped outright (false) — per §4.7 step 3.
pub fn normalize(row: RawStationRow, allow_http_upgrade: bool) -> Result<Station, DropReason> {
    if !row.lastcheckok {
        return Err(DropReason::NotCheckedOk);
    }

    let raw_url = if !row.url_resolved.is_empty() { &row.url_resolved } else { &row.url };
    if raw_url.trim().is_empty() {
        return Err(DropReason::UnusableUrl);
    }

    let mut parsed = url::Url::parse(raw_url.trim()).map_err(|_| DropReason::UnusableUrl)?;
    if parsed.scheme() == "http" {
        if allow_http_upgrade {
            let _ = parsed.set_scheme("https");
        } else {
            return Err(DropReason::Insecure);
        }
    }
    if parsed.scheme() != "https" {
        return Err(DropReason::Insecure);
    }

    let host = parsed.host_str().ok_or(DropReason::UnusableUrl)?.to_ascii_lowercase();
    if is_blocklisted(&host) {
        return Err(DropReason::BlockedDomain);
    }

    let languages: Vec<String> = row
        .language
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    let tags: Vec<String> = row
        .tags
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    let (languages, tags) = Station::dedup_for_indexing(&languages, &tags);

    let coordinates = match (row.geo_lat, row.geo_long) {
        (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
        _ => None,
    };

    let hls = row.hls || parsed.path().ends_with(".m3u8");

    Ok(Station {
        id: row.stationuuid,
        name: row.name.trim().to_string(),
        stream_url: parsed.to_string(),
        homepage: non_empty(row.homepage),
        favicon: non_empty(row.favicon),
        country: non_empty(row.country),
        country_code: non_empty(row.countrycode).map(|c| c.to_ascii_uppercase()),
        state: non_empty(row.state),
        languages,
        tags,
        coordinates,
        bitrate: if row.bitrate > 0 { Some(row.bitrate) } else { None },
        codec: non_empty(row.codec),
        hls,
        is_online: true,
        last_checked_at: row.lastchecktime_iso8601.as_deref().and_then(parse_iso8601_millis),
        last_changed_at: row.lastchangetime_iso8601.as_deref().and_then(parse_iso8601_millis),
        click_count: row.clickcount,
        click_trend: row.clicktrend,
        votes: row.votes,
    })
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_row() -> RawStationRow {
        RawStationRow {
            stationuuid: "abc-123".to_string(),
            name: "Test FM".to_string(),
            url: "http://stream.example.com/live".to_string(),
            url_resolved: "".to_string(),
            homepage: "".to_string(),
            favicon: "".to_string(),
            country: "Germany".to_string(),
            countrycode: "de".to_string(),
            state: "".to_string(),
            language: "german,english".to_string(),
            tags: "jazz,talk".to_string(),
            geo_lat: None,
            geo_long: None,
            bitrate: 128,
            codec: "MP3".to_string(),
            hls: false,
            lastcheckok: true,
            lastchecktime_iso8601: None,
            lastchangetime_iso8601: None,
            clickcount: 10,
            clicktrend: 1,
            votes: 5,
        }
    }

    #[test]
    fn upgrades_http_to_https_when_allowed() {
        let station = normalize(base_row(), true).unwrap();
        assert!(station.stream_url.starts_with("https://"));
    }

    #[test]
    fn drops_http_when_upgrade_disallowed() {
        let err = normalize(base_row(), false).unwrap_err();
        assert_eq!(err, DropReason::Insecure);
    }

    #[test]
    fn drops_not_checked_ok() {
        let mut row = base_row();
        row.lastcheckok = false;
        assert_eq!(normalize(row, true).unwrap_err(), DropReason::NotCheckedOk);
    }

    #[test]
    fn drops_blocklisted_domain() {
        let mut row = base_row();
        row.url = "https://stream-scammer.example/live".to_string();
        assert_eq!(normalize(row, true).unwrap_err(), DropReason::BlockedDomain);
    }

    #[test]
    fn dedups_and_lowercases_tags_for_country_code() {
        let station = normalize(base_row(), true).unwrap();
        assert_eq!(station.country_code.as_deref(), Some("DE"));
        assert_eq!(station.tags, vec!["jazz".to_string(), "talk".to_string()]);
    }

    #[test]
    fn loose_numeric_coercion_accepts_string_bitrate() {
        let json = r#"{
            "stationuuid": "x", "name": "n", "url": "https://example.com/s",
            "bitrate": "192", "hls": "1", "lastcheckok": "1",
            "clickcount": "42", "clicktrend": "-1", "votes": "3"
        }"#;
        let row: RawStationRow = serde_json::from_str(json).unwrap();
        assert_eq!(row.bitrate, 192);
        assert!(row.hls);
        assert!(row.lastcheckok);
        assert_eq!(row.clickcount, 42);
    }
}
