use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, FromRedisValue};
use tokio::sync::RwLock;
use tracing::debug;

use super::{CacheClient, CacheError};

/// Redis-backed cache. Connects lazily and drops the connection after any
/// failure so the next call reconnects.
pub struct RedisCache {
    client: redis::Client,
    conn: RwLock<Option<MultiplexedConnection>>,
}

impl RedisCache {
    /// Parses the URL only; no connection is made until first use, so a
    /// missing Redis never blocks startup.
    pub fn open(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url).context("parse REDIS_URL")?;
        Ok(Self {
            client,
            conn: RwLock::new(None),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        if let Some(conn) = self.conn.read().await.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        debug!("redis connection established");
        *self.conn.write().await = Some(conn.clone());
        Ok(conn)
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, CacheError> {
        let mut conn = self.connection().await?;
        match cmd.query_async::<_, T>(&mut conn).await {
            Ok(v) => Ok(v),
            Err(e) => {
                *self.conn.write().await = None;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl CacheClient for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.query(
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl.as_secs().max(1)),
        )
        .await
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.query(redis::cmd("DEL").arg(key)).await
    }

    async fn push_capped(
        &self,
        key: &str,
        value: &str,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let result = redis::pipe()
            .atomic()
            .cmd("LPUSH").arg(key).arg(value).ignore()
            .cmd("LTRIM").arg(key).arg(0).arg(cap.saturating_sub(1)).ignore()
            .cmd("EXPIRE").arg(key).arg(ttl.as_secs().max(1)).ignore()
            .query_async::<_, ()>(&mut conn)
            .await;
        if result.is_err() {
            *self.conn.write().await = None;
        }
        Ok(result?)
    }

    async fn replace_list(&self, key: &str, values: &[String], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("DEL").arg(key).ignore();
        if !values.is_empty() {
            pipe.cmd("RPUSH").arg(key).arg(values).ignore()
                .cmd("EXPIRE").arg(key).arg(ttl.as_secs().max(1)).ignore();
        }
        let result = pipe.query_async::<_, ()>(&mut conn).await;
        if result.is_err() {
            *self.conn.write().await = None;
        }
        Ok(result?)
    }

    async fn range(&self, key: &str, limit: usize) -> Result<Vec<String>, CacheError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.query(redis::cmd("LRANGE").arg(key).arg(0).arg(limit - 1))
            .await
    }
}
