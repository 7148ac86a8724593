//! Redis-backed cache backend, enabled with the `redis` feature.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::RedisError;
use redis::aio::ConnectionManager;
use tracing::info;

use super::backend::{CacheBackend, ScanPage};
use super::error::BackendError;

const SOURCE: &str = "cache::redis";

#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, BackendError> {
        let client = redis::Client::open(url).map_err(|err| BackendError::InvalidUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|err| BackendError::unavailable(err.to_string()))?;
        info!(target_module = SOURCE, url, "Connected to redis cache");
        Ok(Self { conn })
    }
}

fn map_err(key: &str, err: RedisError) -> BackendError {
    match err.code() {
        Some("WRONGTYPE") => BackendError::WrongType {
            key: key.to_string(),
        },
        _ => BackendError::unavailable(err.to_string()),
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| map_err(key, err))?;
        Ok(value.map(Bytes::from))
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), BackendError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Err(BackendError::InvalidTtl {
                key: key.to_string(),
            });
        }
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value.as_ref())
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await
            .map_err(|err| map_err(key, err))?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| map_err(key, err))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| map_err(key, err))?;
        Ok(count > 0)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("SADD")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(|err| map_err(key, err))?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, BackendError> {
        let mut conn = self.conn.clone();
        redis::cmd("SMEMBERS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|err| map_err(key, err))
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, BackendError> {
        let mut conn = self.conn.clone();
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|err| map_err(pattern, err))?;
        Ok(ScanPage { cursor, keys })
    }

    async fn ping(&self) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|err| BackendError::unavailable(err.to_string()))?;
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}
