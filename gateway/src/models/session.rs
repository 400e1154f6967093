use serde::{Deserialize, Serialize};

/// Stored session record, keyed by session id (opaque, derived from the
/// nonce) in the session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub nonce: String,
    pub issued_at: i64,
    pub expires_at: i64,
    pub csrf_proof: String,
}

/// Secondary, nonce-indexed record. Lets a client that only carries the
/// proof (no cookie) recover session state; the HMAC check still runs
/// regardless of which index served the lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceRecord {
    pub nonce: String,
    pub expires_at: i64,
    pub csrf_proof: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub csrf_token: String,
    pub csrf_proof: String,
    pub expires_at: i64,
}
