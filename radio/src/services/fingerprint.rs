//! Fingerprinting (§3, §4.7 step 5, GLOSSARY): SHA-256 over the
//! newline-joined canonical JSON serialization of the ordered stations
//! list. Equal fingerprints imply byte-equal payloads.

use sha2::{Digest, Sha256};

use crate::models::station::Station;

pub fn fingerprint(stations: &[Station]) -> String {
    let mut hasher = Sha256::new();
    for (i, station) in stations.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        // `Station` fields are all serde-stable (no HashMap at the top
        // level), so serialization order is deterministic across calls.
        let json = serde_json::to_vec(station).expect("Station always serializes");
        hasher.update(&json);
    }
    let digest = hasher.finalize();
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::station::Station;

    fn station(id: &str) -> Station {
        Station {
            id: id.to_string(),
            name: "Test".to_string(),
            stream_url: "https://example.com/stream".to_string(),
            homepage: None,
            favicon: None,
            country: None,
            country_code: None,
            state: None,
            languages: vec![],
            tags: vec![],
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
    fn same_stations_produce_same_fingerprint() {
        let a = fingerprint(&[station("1"), station("2")]);
        let b = fingerprint(&[station("1"), station("2")]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_order_changes_fingerprint() {
        let a = fingerprint(&[station("1"), station("2")]);
        let b = fingerprint(&[station("2"), station("1")]);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_list_is_stable() {
        assert_eq!(fingerprint(&[]), fingerprint(&[]));
    }
}
