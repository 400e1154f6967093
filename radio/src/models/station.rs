//! Station catalog data model (§3): `Station`, `StationsPayload`, and the
//! ephemeral `ProcessedIndex` built lazily over a payload.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Schema version the refresh pipeline writes. Payloads persisted under an
/// older version are rewritten on first read (§3 invariant).
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub languages: Vec<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    pub hls: bool,
    pub is_online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_changed_at: Option<i64>,
    pub click_count: i64,
    pub click_trend: i64,
    pub votes: i64,
}

impl Station {
    /// Lowercased, deduplicated `languages`/`tags` for indexing, preserving
    /// insertion order for the first-seen casing (§3 invariant: dedup +
    /// lowercase for indexing, original case preserved for display).
    pub fn dedup_for_indexing(languages: &[String], tags: &[String]) -> (Vec<String>, Vec<String>) {
        (dedup_preserve_case(languages), dedup_preserve_case(tags))
    }

    /// The host component of `streamUrl`, used for blocklist checks.
    pub fn stream_host(&self) -> Option<String> {
        url::Url::parse(&self.stream_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
    }
}

fn dedup_preserve_case(values: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        let key = v.to_ascii_lowercase();
        if seen.insert(key) {
            out.push(v.clone());
        }
    }
    out
}

/// A projection of `Station` returned to API clients: drops server-only
/// fields (`votes`, `clickTrend`, `coordinates`) and caps `tags` at 12
/// (§4.9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedStation {
    pub id: String,
    pub name: String,
    pub stream_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub languages: Vec<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    pub hls: bool,
    pub click_count: i64,
}

const MAX_PROJECTED_TAGS: usize = 12;

impl From<&Station> for ProjectedStation {
    fn from(s: &Station) -> Self {
        Self {
            id: s.id.clone(),
            name: s.name.clone(),
            stream_url: s.stream_url.clone(),
            homepage: s.homepage.clone(),
            favicon: s.favicon.clone(),
            country: s.country.clone(),
            country_code: s.country_code.clone(),
            state: s.state.clone(),
            languages: s.languages.clone(),
            tags: s.tags.iter().take(MAX_PROJECTED_TAGS).cloned().collect(),
            bitrate: s.bitrate,
            codec: s.codec.clone(),
            hls: s.hls,
            click_count: s.click_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationsPayload {
    pub schema_version: u32,
    pub updated_at: i64,
    pub source: String,
    pub requests: Vec<String>,
    pub total: usize,
    pub fingerprint: String,
    pub stations: Vec<Station>,
}

impl StationsPayload {
    /// `total == len(stations)` and unique ids, per §3/§8 invariants.
    pub fn is_consistent(&self) -> bool {
        if self.total != self.stations.len() {
            return false;
        }
        let mut ids = std::collections::HashSet::with_capacity(self.stations.len());
        self.stations.iter().all(|s| ids.insert(s.id.as_str()))
    }
}

/// Derived, ephemeral acceleration structure (§3). Built lazily from a
/// payload and discarded when the payload is replaced; never persisted.
pub struct ProcessedIndex {
    pub countries: Vec<String>,
    pub genres: Vec<String>,
    pub by_country: HashMap<String, Vec<usize>>,
    pub by_language: HashMap<String, Vec<usize>>,
    pub by_tag: HashMap<String, Vec<usize>>,
    pub search_texts: Vec<String>,
}

const TOP_GENRE_COUNT: usize = 50;

impl ProcessedIndex {
    pub fn build(payload: &StationsPayload) -> Self {
        let mut by_country: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_language: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_tag: HashMap<String, Vec<usize>> = HashMap::new();
        let mut tag_counts: HashMap<String, usize> = HashMap::new();
        let mut countries = std::collections::BTreeSet::new();
        let mut search_texts = Vec::with_capacity(payload.stations.len());

        for (idx, station) in payload.stations.iter().enumerate() {
            if let Some(country) = &station.country {
                let key = country.to_ascii_lowercase();
                by_country.entry(key).or_default().push(idx);
                countries.insert(country.clone());
            }
            if let Some(code) = &station.country_code {
                by_country.entry(code.to_ascii_lowercase()).or_default().push(idx);
            }
            for lang in &station.languages {
                by_language.entry(lang.to_ascii_lowercase()).or_default().push(idx);
            }
            for tag in &station.tags {
                let key = tag.to_ascii_lowercase();
                by_tag.entry(key.clone()).or_default().push(idx);
                *tag_counts.entry(key).or_insert(0) += 1;
            }

            let mut text = String::new();
            text.push_str(&station.name.to_ascii_lowercase());
            text.push(' ');
            if let Some(c) = &station.country {
                text.push_str(&c.to_ascii_lowercase());
                text.push(' ');
            }
            for tag in &station.tags {
                text.push_str(&tag.to_ascii_lowercase());
                text.push(' ');
            }
            search_texts.push(text);
        }

        let mut genre_counts: Vec<(String, usize)> = tag_counts.into_iter().collect();
        genre_counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let genres = genre_counts
            .into_iter()
            .take(TOP_GENRE_COUNT)
            .map(|(tag, _)| tag)
            .collect();

        Self {
            countries: countries.into_iter().collect(),
            genres,
            by_country,
            by_language,
            by_tag,
            search_texts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str, country: &str, tags: &[&str]) -> Station {
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
            click_count: 0,
            click_trend: 0,
            votes: 0,
        }
    }

    #[test]
    fn consistency_check_catches_mismatched_total() {
        let payload = StationsPayload {
            schema_version: CURRENT_SCHEMA_VERSION,
            updated_at: 0,
            source: "test".into(),
            requests: vec![],
            total: 2,
            fingerprint: "x".into(),
            stations: vec![station("a", "DE", &["jazz"])],
        };
        assert!(!payload.is_consistent());
    }

    #[test]
    fn index_groups_by_country_and_tag() {
        let payload = StationsPayload {
            schema_version: CURRENT_SCHEMA_VERSION,
            updated_at: 0,
            source: "test".into(),
            requests: vec![],
            total: 2,
            fingerprint: "x".into(),
            stations: vec![station("a", "DE", &["jazz"]), station("b", "FR", &["jazz", "rock"])],
        };
        let index = ProcessedIndex::build(&payload);
        assert_eq!(index.by_country.get("de").unwrap(), &vec![0]);
        assert_eq!(index.by_tag.get("jazz").unwrap(), &vec![0, 1]);
        assert_eq!(index.countries, vec!["DE".to_string(), "FR".to_string()]);
    }

    #[test]
    fn projected_station_caps_tags_and_drops_server_fields() {
        let many_tags: Vec<&str> = vec!["a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m", "n"];
        let s = station("a", "DE", &many_tags);
        let projected = ProjectedStation::from(&s);
        assert_eq!(projected.tags.len(), 12);
    }
}
