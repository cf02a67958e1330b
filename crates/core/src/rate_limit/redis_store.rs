//! Redis counter store.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

use super::store::CounterStore;
use crate::error::CounterStoreError;

/// Counter store backed by Redis `INCR` with `EXPIRE ... NX`.
///
/// Requires Redis 7 or later for the `NX` flag.
#[derive(Clone)]
pub struct RedisCounterStore {
    pool: Pool,
    url: String,
}

impl std::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("url", &self.url)
            .finish()
    }
}

impl RedisCounterStore {
    /// Connects to Redis at `url` and verifies the connection with `PING`.
    pub async fn connect(url: &str) -> Result<Self, CounterStoreError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CounterStoreError::Unavailable {
                message: format!("failed to create Redis pool: {e}"),
            })?;

        let store = Self {
            pool,
            url: url.to_string(),
        };
        store.health_check().await?;

        info!(url = %url, "Redis counter store connected");
        Ok(store)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CounterStoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| CounterStoreError::Unavailable {
                message: format!("failed to get Redis connection: {e}"),
            })
    }
}

/// `INCR` plus a millisecond `PEXPIRE ... NX`, so sub-second windows keep
/// their counter for the whole window.
fn increment_pipeline(key: &str, ttl: Duration) -> redis::Pipeline {
    let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
    let mut pipe = redis::pipe();
    pipe.atomic()
        .cmd("INCR")
        .arg(key)
        .cmd("PEXPIRE")
        .arg(key)
        .arg(ttl_ms)
        .arg("NX")
        .ignore();
    pipe
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64, CounterStoreError> {
        let mut conn = self.connection().await?;
        let (count,): (u64,) = increment_pipeline(key, ttl)
            .query_async(&mut *conn)
            .await?;
        Ok(count)
    }

    async fn health_check(&self) -> Result<(), CounterStoreError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut *conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(key: &str, ttl: Duration) -> String {
        String::from_utf8(increment_pipeline(key, ttl).get_packed_pipeline()).unwrap()
    }

    #[test]
    fn test_expiry_keeps_milliseconds() {
        let commands = packed("rate_limit:t-1:read:7", Duration::from_millis(1500));
        assert!(commands.contains("PEXPIRE"));
        assert!(commands.contains("\r\n1500\r\n"));
        assert!(commands.contains("\r\nNX\r\n"));
        assert!(!commands.contains("\r\nEXPIRE\r\n"));
    }

    #[test]
    fn test_zero_ttl_still_expires() {
        let commands = packed("k", Duration::ZERO);
        assert!(commands.contains("$7\r\nPEXPIRE\r\n$1\r\nk\r\n$1\r\n1\r\n"));
    }
}
