//! Favorites store data model (§3, §4.11): per-session ordered slot list
//! with snapshotted station projections.

use serde::{Deserialize, Serialize};

use super::station::ProjectedStation;

/// Maximum number of favorite slots per session.
pub const MAX_SLOTS: usize = 6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteEntry {
    pub station_id: String,
    pub saved_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ProjectedStation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoritesRecord {
    pub version: u32,
    pub entries: Vec<FavoriteEntry>,
}

impl Default for FavoritesRecord {
    fn default() -> Self {
        Self { version: 1, entries: Vec::new() }
    }
}

impl FavoritesRecord {
    pub fn find(&self, station_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.station_id == station_id)
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= MAX_SLOTS
    }
}
