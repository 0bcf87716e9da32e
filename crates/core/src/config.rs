//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Largest accepted file upload body in bytes.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.bind.trim().is_empty() {
            return Err("server.bind must not be empty".to_string());
        }
        if self.max_upload_bytes == 0 {
            return Err("server.max_upload_bytes must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (single node deployments and tests).
    Sqlite {
        /// Database file path, or `:memory:`.
        path: PathBuf,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields if both are provided.
        url: Option<String>,
        /// Database host (e.g., "localhost" or "db.example.com").
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: u16,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// Prefer CANOPY_METADATA__PASSWORD over storing it in the config file.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Connection attempts made at startup before giving up.
        #[serde(default = "default_connect_attempts")]
        connect_attempts: u32,
        /// Fixed delay between startup connection attempts.
        #[serde(default = "default_connect_backoff_ms")]
        connect_backoff_ms: u64,
    },
}

fn default_pg_port() -> u16 {
    5432
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_attempts() -> u32 {
    10
}

fn default_connect_backoff_ms() -> u64 {
    1000
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { path } => {
                if path.as_os_str().is_empty() {
                    Err("sqlite config requires a non-empty 'path'".to_string())
                } else {
                    Ok(())
                }
            }
            MetadataConfig::Postgres {
                url,
                host,
                database,
                connect_attempts,
                ..
            } => {
                if *connect_attempts == 0 {
                    return Err("postgres 'connect_attempts' must be at least 1".to_string());
                }
                match (url.as_ref(), host.as_ref(), database.as_ref()) {
                    (Some(_), _, _) => Ok(()),
                    (None, Some(_), Some(_)) => Ok(()),
                    (None, None, _) => Err(
                        "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                    ),
                    (None, Some(_), None) => Err(
                        "postgres config requires 'database' when using individual fields"
                            .to_string(),
                    ),
                }
            }
        }
    }
}

/// Size cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheConfig {
    /// In-process cache. Entries are lost on restart, which is safe because the
    /// metadata store stays authoritative.
    Memory {
        /// Entry time-to-live in seconds. `None` keeps entries until overwritten.
        #[serde(default = "default_cache_ttl_secs")]
        ttl_secs: Option<u64>,
    },
    /// Shared Redis cache, required when several server instances stage
    /// into the same folders.
    Redis {
        /// Connection URL (e.g., "redis://cache:6379/0").
        url: String,
        /// Entry time-to-live in seconds, enforced by Redis itself.
        #[serde(default = "default_cache_ttl_secs")]
        ttl_secs: Option<u64>,
    },
}

fn default_cache_ttl_secs() -> Option<u64> {
    Some(24 * 60 * 60)
}

/// Upper bound between two sweeps of an in-process cache.
const MAX_PURGE_INTERVAL: Duration = Duration::from_secs(5 * 60);

impl Default for CacheConfig {
    fn default() -> Self {
        Self::Memory {
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            CacheConfig::Memory { ttl_secs } | CacheConfig::Redis { ttl_secs, .. } => {
                ttl_secs.map(Duration::from_secs)
            }
        }
    }

    /// How often expired entries must be swept out of the process.
    ///
    /// `None` when nothing expires or the backend expires keys on its own.
    pub fn purge_interval(&self) -> Option<Duration> {
        match self {
            CacheConfig::Memory { .. } => self.ttl().map(|ttl| ttl.min(MAX_PURGE_INTERVAL)),
            CacheConfig::Redis { .. } => None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.ttl().is_some_and(|ttl| ttl.is_zero()) {
            return Err("cache 'ttl_secs' must be greater than zero when set".to_string());
        }
        match self {
            CacheConfig::Redis { url, .. }
                if !url.starts_with("redis://") && !url.starts_with("rediss://") =>
            {
                Err("redis cache 'url' must start with redis:// or rediss://".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Blob storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for blobs.
        path: PathBuf,
        /// Base URL prefixed to blob keys in returned URLs.
        /// When unset, `file://` URLs pointing into `path` are returned.
        #[serde(default)]
        public_base_url: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
            public_base_url: None,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem {
                public_base_url: Some(base),
                ..
            } if base.trim().is_empty() => {
                Err("storage 'public_base_url' must not be empty when set".to_string())
            }
            StorageConfig::Filesystem { .. } => Ok(()),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Size cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Blob storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Create a test configuration rooted in `dir`.
    ///
    /// **For testing only.** Uses SQLite metadata, an in-memory cache
    /// without expiry, and filesystem blobs.
    pub fn for_testing(dir: &std::path::Path) -> Self {
        Self {
            server: ServerConfig::default(),
            metadata: MetadataConfig::Sqlite {
                path: dir.join("metadata.db"),
            },
            cache: CacheConfig::Memory { ttl_secs: None },
            storage: StorageConfig::Filesystem {
                path: dir.join("blobs"),
                public_base_url: Some("http://blobs.test".to_string()),
            },
        }
    }

    /// Validate every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.metadata.validate()?;
        self.cache.validate()?;
        self.storage.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert!(config.server.metrics_enabled);
        assert!(matches!(config.metadata, MetadataConfig::Sqlite { .. }));
    }

    #[test]
    fn test_postgres_defaults_from_json() {
        let json = r#"{"type": "postgres", "host": "db", "database": "canopy"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        match &config {
            MetadataConfig::Postgres {
                port,
                connect_attempts,
                connect_backoff_ms,
                max_connections,
                ..
            } => {
                assert_eq!(*port, 5432);
                assert_eq!(*connect_attempts, 10);
                assert_eq!(*connect_backoff_ms, 1000);
                assert_eq!(*max_connections, 10);
            }
            _ => panic!("expected postgres config"),
        }
        config.validate().unwrap();
    }

    #[test]
    fn test_postgres_requires_database_or_url() {
        let json = r#"{"type": "postgres", "host": "db"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().unwrap_err().contains("database"));

        let json = r#"{"type": "postgres"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_postgres_rejects_zero_attempts() {
        let json = r#"{"type": "postgres", "url": "postgres://x", "connect_attempts": 0}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_ttl() {
        let config: CacheConfig = serde_json::from_str(r#"{"type": "memory"}"#).unwrap();
        assert_eq!(config.ttl(), Some(Duration::from_secs(86400)));

        let config = CacheConfig::Memory { ttl_secs: Some(0) };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_purge_interval() {
        let config = CacheConfig::Memory { ttl_secs: Some(30) };
        assert_eq!(config.purge_interval(), Some(Duration::from_secs(30)));
        assert_eq!(
            CacheConfig::default().purge_interval(),
            Some(MAX_PURGE_INTERVAL)
        );
        assert_eq!(CacheConfig::Memory { ttl_secs: None }.purge_interval(), None);
    }

    #[test]
    fn test_redis_cache_from_json() {
        let json = r#"{"type": "redis", "url": "redis://cache:6379"}"#;
        let config: CacheConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.ttl(), Some(Duration::from_secs(86400)));
        assert_eq!(config.purge_interval(), None);

        let json = r#"{"type": "redis", "url": "cache:6379"}"#;
        let config: CacheConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().unwrap_err().contains("redis://"));

        let json = r#"{"type": "redis", "url": "redis://cache", "ttl_secs": 0}"#;
        let config: CacheConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_for_testing_paths() {
        let dir = std::path::Path::new("/tmp/canopy-test");
        let config = AppConfig::for_testing(dir);
        config.validate().unwrap();
        match config.storage {
            StorageConfig::Filesystem { path, .. } => assert_eq!(path, dir.join("blobs")),
        }
    }
}
