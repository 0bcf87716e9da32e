//! Folder tree storage and size propagation for canopy.
//!
//! This crate owns the durable side of size accounting:
//! - Folder, file and upload transaction records (SQLite and PostgreSQL)
//! - Units of work over the tree ([`TreeTransaction`])
//! - The propagation engine in [`tree`], which keeps every folder's size equal
//!   to its files plus all descendant folders

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;
pub mod tree;
pub mod tree_tx;

pub use error::{MetadataError, MetadataResult};
pub use postgres::{ConnectRetry, PostgresStore};
pub use store::{MetadataStore, SqliteStore};
pub use tree_tx::TreeTransaction;

use canopy_core::config::MetadataConfig;
use std::sync::Arc;
use std::time::Duration;

/// Create a metadata store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn MetadataStore>> {
    config.validate().map_err(MetadataError::Config)?;

    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            max_connections,
            connect_attempts,
            connect_backoff_ms,
        } => {
            let retry = ConnectRetry {
                attempts: *connect_attempts,
                backoff: Duration::from_millis(*connect_backoff_ms),
            };
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, retry).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    *port,
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *max_connections,
                    retry,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
    }
}
