//! Redis-backed address cache tier
//!
//! Shared string key/value cache consulted by the registry on a memory
//! miss. A keep-alive task pings the server on a fixed interval so a
//! dead connection shows up in the logs before the hot path trips on it.

use crate::registry::AddressCache;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Interval between keep-alive pings.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(2);

/// Cache tier over a multiplexed Redis connection.
///
/// Cloning is cheap; clones share the underlying connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    /// Connect and verify the server answers a ping.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .with_context(|| format!("Invalid Redis URL: {}", redis_url))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        let cache = Self { conn };
        cache.ping().await.context("Failed to ping Redis")?;
        Ok(cache)
    }

    /// Round-trip a PING.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis PING failed")?;
        Ok(())
    }

    /// Spawn the keep-alive loop. It exits when `cancel` fires.
    pub fn spawn_keepalive(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Redis keep-alive stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = cache.ping().await {
                            warn!(error = ?e, "Redis keep-alive ping failed");
                        }
                    }
                }
            }
        })
    }
}

#[async_trait]
impl AddressCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("Failed to GET {}", key))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl.as_secs())
            .await
            .with_context(|| format!("Failed to SET {}", key))?;
        Ok(())
    }
}
