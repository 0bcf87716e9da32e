//! Redis-backed size cache shared between server instances.

use crate::error::{CacheError, CacheResult};
use crate::traits::SizeCache;
use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Client, RedisError, Script};
use std::time::Duration;

/// Adds to a counter, drops it once it reaches zero, and renews its TTL,
/// all in one round trip.
const INCREMENT_SCRIPT: &str = r"
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
if value == 0 then
    redis.call('DEL', KEYS[1])
elseif tonumber(ARGV[2]) > 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return value
";

/// Size cache stored in Redis.
///
/// Values are plain integer strings, so `INCRBY` works on them directly.
/// Expiry is left to Redis; nothing needs purging from this process.
pub struct RedisSizeCache {
    conn: ConnectionManager,
    ttl: Option<Duration>,
    increment: Script,
}

impl RedisSizeCache {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str, ttl: Option<Duration>) -> CacheResult<Self> {
        let client = Client::open(url).map_err(|e| CacheError::Config(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(map_redis_error)?;
        Ok(Self {
            conn,
            ttl,
            increment: Script::new(INCREMENT_SCRIPT),
        })
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.map(|ttl| ttl.as_secs().max(1)).unwrap_or(0)
    }
}

fn map_redis_error(e: RedisError) -> CacheError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        CacheError::Unavailable(e.to_string())
    } else {
        CacheError::Internal(e.to_string())
    }
}

#[async_trait]
impl SizeCache for RedisSizeCache {
    async fn get(&self, key: &str) -> CacheResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await.map_err(map_redis_error)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: i64) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = match self.ttl_secs() {
            0 => conn.set(key, value).await,
            secs => conn.set_ex(key, value, secs).await,
        }
        .map_err(map_redis_error)?;
        Ok(())
    }

    async fn multi_get(&self, keys: &[String]) -> CacheResult<Vec<(String, i64)>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<i64>> = ::redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|value| (key.clone(), value)))
            .collect())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(map_redis_error)?;
        Ok(())
    }

    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = self
            .increment
            .key(key)
            .arg(delta)
            .arg(self.ttl_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(value)
    }

    async fn health_check(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: String = ::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }
}
