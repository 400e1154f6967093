//! Session & CSRF manager (C3).
//!
//! Sessions live in a shared Redis store when configured, else fall back to
//! an in-process table behind the same `SessionBackend` so `issue`/`validate`
//! don't care which is live.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::Method;
use chrono::Utc;
use tokio::sync::RwLock;

use super::csrf;
use super::redis_store::RedisStore;
use crate::models::session::{NonceRecord, SessionRecord};

#[derive(Default)]
struct MemoryTables {
    sessions: HashMap<String, SessionRecord>,
    nonces: HashMap<String, NonceRecord>,
}

#[derive(Clone)]
enum Backend {
    Redis(RedisStore),
    Memory(Arc<RwLock<MemoryTables>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidateError {
    SessionRequired,
    Expired,
    CsrfMismatch,
    InvalidProof,
}

pub struct SessionManager {
    backend: Backend,
    secret: Vec<u8>,
    pub cookie_name: String,
    ttl_seconds: i64,
}

fn session_key(id: &str) -> String {
    format!("session:{id}")
}

fn nonce_key(nonce: &str) -> String {
    format!("session:nonce:{nonce}")
}

impl SessionManager {
    pub fn with_redis(redis: RedisStore, secret: Vec<u8>, cookie_name: String, ttl_seconds: i64) -> Self {
        Self {
            backend: Backend::Redis(redis),
            secret,
            cookie_name,
            ttl_seconds,
        }
    }

    pub fn in_memory(secret: Vec<u8>, cookie_name: String, ttl_seconds: i64) -> Self {
        Self {
            backend: Backend::Memory(Arc::new(RwLock::new(MemoryTables::default()))),
            secret,
            cookie_name,
            ttl_seconds,
        }
    }

    async fn put_session(&self, record: &SessionRecord) -> anyhow::Result<()> {
        match &self.backend {
            Backend::Redis(store) => {
                store
                    .set_ex(&session_key(&record.id), record, self.ttl_seconds as u64)
                    .await
            }
            Backend::Memory(tables) => {
                tables
                    .write()
                    .await
                    .sessions
                    .insert(record.id.clone(), record.clone());
                Ok(())
            }
        }
    }

    async fn get_session(&self, id: &str) -> anyhow::Result<Option<SessionRecord>> {
        match &self.backend {
            Backend::Redis(store) => store.get(&session_key(id)).await,
            Backend::Memory(tables) => Ok(tables.read().await.sessions.get(id).cloned()),
        }
    }

    async fn put_nonce(&self, record: &NonceRecord) -> anyhow::Result<()> {
        match &self.backend {
            Backend::Redis(store) => {
                store
                    .set_ex(&nonce_key(&record.nonce), record, self.ttl_seconds as u64)
                    .await
            }
            Backend::Memory(tables) => {
                tables
                    .write()
                    .await
                    .nonces
                    .insert(record.nonce.clone(), record.clone());
                Ok(())
            }
        }
    }

    async fn get_nonce(&self, nonce: &str) -> anyhow::Result<Option<NonceRecord>> {
        match &self.backend {
            Backend::Redis(store) => store.get(&nonce_key(nonce)).await,
            Backend::Memory(tables) => Ok(tables.read().await.nonces.get(nonce).cloned()),
        }
    }

    async fn delete_nonce(&self, nonce: &str) -> anyhow::Result<()> {
        match &self.backend {
            Backend::Redis(store) => store.del(&nonce_key(nonce)).await,
            Backend::Memory(tables) => {
                tables.write().await.nonces.remove(nonce);
                Ok(())
            }
        }
    }

    /// Bootstraps the shared CSRF secret: if a Redis backend is present,
    /// performs a set-if-absent so replicas converge on the same value.
    pub async fn bootstrap_secret(&self) -> anyhow::Result<()> {
        if let Backend::Redis(store) = &self.backend {
            let hex_secret = self.secret.iter().fold(String::new(), |mut acc, b| {
                use std::fmt::Write;
                let _ = write!(acc, "{b:02x}");
                acc
            });
            store.set_nx("session:secret", &hex_secret).await?;
        }
        Ok(())
    }

    /// Issues a new session, persisting it under both the session-id and
    /// nonce-indexed keyspaces.
    pub async fn issue(&self) -> anyhow::Result<SessionRecord> {
        let nonce = csrf::generate_nonce();
        let issued_at = Utc::now().timestamp_millis();
        let expires_at = issued_at + self.ttl_seconds * 1000;
        let csrf_proof = csrf::sign_proof(&self.secret, &nonce, expires_at);

        let record = SessionRecord {
            id: nonce.clone(),
            nonce: nonce.clone(),
            issued_at,
            expires_at,
            csrf_proof: csrf_proof.clone(),
        };

        self.put_session(&record).await?;
        self.put_nonce(&NonceRecord {
            nonce,
            expires_at,
            csrf_proof,
        })
        .await?;

        Ok(record)
    }

    /// Loads a session by cookie, falling back to proof-header recovery and
    /// then nonce-index recovery, then checks CSRF for state-mutating
    /// methods. On success the session TTL is refreshed and the proof
    /// re-signed.
    pub async fn validate(
        &self,
        cookie_session_id: Option<&str>,
        proof_header: Option<&str>,
        csrf_token_header: Option<&str>,
        method: &Method,
    ) -> Result<SessionRecord, ValidateError> {
        let mut session = self.load_session(cookie_session_id, proof_header, csrf_token_header).await;

        let now = Utc::now().timestamp_millis();
        if let Some(s) = &session {
            if now > s.expires_at {
                let _ = self.delete_nonce(&s.nonce).await;
                session = None;
            }
        }

        let Some(session) = session else {
            // A proof header was supplied but failed to verify or recover a
            // session: that's a forged/tampered proof (403), distinct from
            // simply not having any session at all (401).
            if cookie_session_id.is_none() && proof_header.is_some() {
                return Err(ValidateError::InvalidProof);
            }
            return Err(ValidateError::SessionRequired);
        };

        if *method != Method::OPTIONS {
            let supplied = csrf_token_header;
            match supplied {
                Some(token) if csrf::constant_time_eq(token, &session.nonce) => {}
                _ => return Err(ValidateError::CsrfMismatch),
            }
        }

        // Refresh TTL and re-sign.
        let issued_at = session.issued_at;
        let expires_at = now + self.ttl_seconds * 1000;
        let csrf_proof = csrf::sign_proof(&self.secret, &session.nonce, expires_at);
        let refreshed = SessionRecord {
            id: session.id.clone(),
            nonce: session.nonce.clone(),
            issued_at,
            expires_at,
            csrf_proof: csrf_proof.clone(),
        };

        let _ = self.put_session(&refreshed).await;
        let _ = self
            .put_nonce(&NonceRecord {
                nonce: refreshed.nonce.clone(),
                expires_at,
                csrf_proof,
            })
            .await;

        Ok(refreshed)
    }

    async fn load_session(
        &self,
        cookie_session_id: Option<&str>,
        proof_header: Option<&str>,
        csrf_token_header: Option<&str>,
    ) -> Option<SessionRecord> {
        if let Some(id) = cookie_session_id {
            if let Ok(Some(session)) = self.get_session(id).await {
                return Some(session);
            }
        }

        if let Some(proof) = proof_header {
            if let Some(parsed) = csrf::verify_proof(&self.secret, proof) {
                let now = Utc::now().timestamp_millis();
                if now <= parsed.expires_at {
                    return Some(SessionRecord {
                        id: parsed.nonce.clone(),
                        nonce: parsed.nonce,
                        issued_at: now,
                        expires_at: parsed.expires_at,
                        csrf_proof: proof.to_string(),
                    });
                }
            }
        }

        if let Some(token) = csrf_token_header {
            if let Ok(Some(record)) = self.get_nonce(token).await {
                if csrf::verify_proof(&self.secret, &record.csrf_proof).is_some() {
                    let now = Utc::now().timestamp_millis();
                    if now <= record.expires_at {
                        return Some(SessionRecord {
                            id: record.nonce.clone(),
                            nonce: record.nonce,
                            issued_at: now,
                            expires_at: record.expires_at,
                            csrf_proof: record.csrf_proof,
                        });
                    }
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::in_memory(b"test-secret-at-least-32-bytes!!".to_vec(), "gw_session".to_string(), 3600)
    }

    #[tokio::test]
    async fn issue_then_validate_with_cookie_and_csrf_header() {
        let mgr = manager();
        let session = mgr.issue().await.unwrap();

        let result = mgr
            .validate(Some(&session.id), None, Some(&session.nonce), &Method::POST)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn missing_csrf_on_post_is_rejected() {
        let mgr = manager();
        let session = mgr.issue().await.unwrap();

        let result = mgr
            .validate(Some(&session.id), None, None, &Method::POST)
            .await;
        assert_eq!(result.unwrap_err(), ValidateError::CsrfMismatch);
    }

    #[tokio::test]
    async fn get_without_session_is_rejected() {
        let mgr = manager();
        let result = mgr.validate(None, None, None, &Method::GET).await;
        assert_eq!(result.unwrap_err(), ValidateError::SessionRequired);
    }

    #[tokio::test]
    async fn proof_only_recovery_works() {
        let mgr = manager();
        let session = mgr.issue().await.unwrap();

        let result = mgr
            .validate(None, Some(&session.csrf_proof), Some(&session.nonce), &Method::POST)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn options_never_requires_csrf() {
        let mgr = manager();
        let session = mgr.issue().await.unwrap();
        let result = mgr
            .validate(Some(&session.id), None, None, &Method::OPTIONS)
            .await;
        assert!(result.is_ok());
    }
}
