//! Thin generic wrapper around a Redis connection: the shared-store tier for
//! the validation cache, favorites records, and the stations in-process
//! cache's TTL companion. Falls back to in-process maps everywhere it's
//! used when no `REDIS_URL` is configured (see each caller's `*Store` enum).

use anyhow::Result;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    pub async fn set_ex<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        let serialized = serde_json::to_string(value)?;
        conn.set_ex(key, serialized, ttl_seconds.max(1)).await?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        match value {
            Some(v) => Ok(Some(serde_json::from_str(&v)?)),
            None => Ok(None),
        }
    }

    pub async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.del(key).await?;
        Ok(())
    }

    pub async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.expire(key, ttl_seconds).await?;
        Ok(())
    }

    /// Distributed refresh lock: set-if-absent with a TTL, mirroring the
    /// teacher's `acquire_processing_lock`. A secondary guard against two
    /// replicas refreshing concurrently; the primary single-flight guard is
    /// the in-process `Shared` future in `services::refresh`.
    pub async fn try_acquire_lock(&self, key: &str, owner: &str, ttl_seconds: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    pub async fn ping(&self) -> Result<bool> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}
