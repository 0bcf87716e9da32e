//! Redis test utilities.

use canopy_cache::{CacheError, CacheResult, RedisSizeCache};
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::{REDIS_PORT, Redis};

/// Stable prefix for Docker/container startup failures in Redis test setup.
/// Tests use this marker to decide whether to skip due to unavailable Docker.
pub const REDIS_CONTAINER_START_ERR_PREFIX: &str = "redis-container-start:";

/// A Redis size cache backed by a testcontainer, stopped on drop.
pub struct TestRedis {
    pub url: String,
    _container: ContainerAsync<Redis>,
}

impl TestRedis {
    pub async fn new() -> CacheResult<Self> {
        let container = Redis::default().start().await.map_err(|e| {
            CacheError::Unavailable(format!(
                "{} Failed to start Redis container: {e}",
                REDIS_CONTAINER_START_ERR_PREFIX
            ))
        })?;

        let host = container.get_host().await.expect("Failed to get host");
        let port = container
            .get_host_port_ipv4(REDIS_PORT)
            .await
            .expect("Failed to get port");

        Ok(Self {
            url: format!("redis://{host}:{port}"),
            _container: container,
        })
    }

    /// Connect a fresh cache client to the container.
    pub async fn cache(&self, ttl: Option<Duration>) -> RedisSizeCache {
        RedisSizeCache::connect(&self.url, ttl)
            .await
            .expect("Failed to connect to Redis")
    }
}

/// Start Redis, or return `None` when Docker is unavailable or
/// `SKIP_REDIS_TESTS` is set.
pub async fn redis_or_skip() -> Option<TestRedis> {
    if std::env::var("SKIP_REDIS_TESTS").is_ok() {
        eprintln!("Skipping Redis tests: SKIP_REDIS_TESTS is set");
        return None;
    }
    match TestRedis::new().await {
        Ok(redis) => Some(redis),
        Err(err) if err.to_string().contains(REDIS_CONTAINER_START_ERR_PREFIX) => {
            eprintln!("Skipping Redis tests: {err}");
            None
        }
        Err(err) => panic!("Failed to create Redis test cache: {err}"),
    }
}
