//! Redis-backed storage shared by every process pointing at the same server.
//!
//! Key layout:
//! - `{prefix}` holds a counter, incremented once per saved execution.
//! - `{prefix}-{group}-{timestamp_nanos}-{sequence}` holds one execution,
//!   valued with its timestamp and expiring after the throttling period.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use super::Storage;
use crate::error::StorageError;
use crate::validation::validate_group_id;

/// Redis primitives the storage is built on.
#[async_trait]
pub trait RedisCommands: Send + Sync {
    /// `INCR key`
    async fn incr(&self, key: &str) -> RedisResult<u64>;

    /// `SET key value NX PX ttl_ms`; `true` when the key was created.
    async fn set_nx_px(&self, key: &str, value: u64, ttl_ms: u64) -> RedisResult<bool>;

    /// `KEYS pattern`
    async fn keys(&self, pattern: &str) -> RedisResult<Vec<String>>;
}

#[async_trait]
impl RedisCommands for MultiplexedConnection {
    async fn incr(&self, key: &str) -> RedisResult<u64> {
        let mut conn = self.clone();
        redis::cmd("INCR")
            .arg(key)
            .query_async::<_, u64>(&mut conn)
            .await
    }

    async fn set_nx_px(&self, key: &str, value: u64, ttl_ms: u64) -> RedisResult<bool> {
        let mut conn = self.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn keys(&self, pattern: &str) -> RedisResult<Vec<String>> {
        let mut conn = self.clone();
        redis::cmd("KEYS")
            .arg(pattern)
            .query_async::<_, Vec<String>>(&mut conn)
            .await
    }
}

pub struct RedisStorage<C = MultiplexedConnection> {
    prefix: String,
    client: C,
}

impl RedisStorage<MultiplexedConnection> {
    /// Open a multiplexed connection to `redis_url`.
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, StorageError> {
        let client = Client::open(redis_url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        Ok(Self::new(prefix, conn))
    }
}

impl<C: RedisCommands> RedisStorage<C> {
    pub fn new(prefix: impl Into<String>, client: C) -> Self {
        Self {
            prefix: prefix.into(),
            client,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn record_key(&self, group: &str, timestamp: u64, sequence: u64) -> String {
        format!("{}-{}-{}-{}", self.prefix, group, timestamp, sequence)
    }

    fn group_pattern(&self, group: &str) -> String {
        format!("{}-{}-*", escape_glob(&self.prefix), escape_glob(group))
    }

    /// Timestamp of a key listed by [`group_pattern`](Self::group_pattern),
    /// or `None` when the key belongs to another group whose id merely
    /// starts with `group-`.
    fn record_timestamp(&self, group: &str, key: &str) -> Option<u64> {
        let rest = key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('-')?
            .strip_prefix(group)?
            .strip_prefix('-')?;
        let (timestamp, sequence) = rest.split_once('-')?;
        sequence.parse::<u64>().ok()?;
        timestamp.parse().ok()
    }
}

#[async_trait]
impl<C: RedisCommands> Storage for RedisStorage<C> {
    async fn count_last_executed(
        &self,
        group: &str,
        after: SystemTime,
    ) -> Result<u64, StorageError> {
        validate_group_id(group)?;

        let pattern = self.group_pattern(group);
        let keys = self.client.keys(&pattern).await.map_err(|e| {
            warn!(pattern = %pattern, error = %e, "failed to list execution records");
            StorageError::Redis(e)
        })?;

        let after = unix_nanos(after);
        let count = keys
            .iter()
            .filter_map(|key| self.record_timestamp(group, key))
            .filter(|&timestamp| timestamp >= after)
            .count() as u64;

        debug!(group, listed = keys.len(), count, "counted execution records");
        Ok(count)
    }

    async fn save_successful_execution(
        &self,
        group: &str,
        at: SystemTime,
        expiration: Duration,
    ) -> Result<(), StorageError> {
        validate_group_id(group)?;

        let sequence = self.client.incr(&self.prefix).await?;
        let timestamp = unix_nanos(at);
        let key = self.record_key(group, timestamp, sequence);
        let ttl_ms = u64::try_from(expiration.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);

        if !self.client.set_nx_px(&key, timestamp, ttl_ms).await? {
            return Err(StorageError::KeyCollision(key));
        }

        debug!(key = %key, ttl_ms, "saved execution record");
        Ok(())
    }
}

fn unix_nanos(instant: SystemTime) -> u64 {
    instant
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
