//! canopy server binary.

use anyhow::{Context, Result};
use canopy_core::config::AppConfig;
use canopy_server::{AppState, create_router};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// canopy - folder size accounting service
#[derive(Parser, Debug)]
#[command(name = "canopyd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "CANOPY_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,

    /// Override the listen address from the configuration
    #[arg(short, long)]
    bind: Option<String>,
}

/// Load configuration from an optional TOML file overlaid with `CANOPY_`
/// environment variables (`CANOPY_SERVER__BIND`, `CANOPY_METADATA__TYPE`, ...).
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if path.exists() {
        tracing::info!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::info!(
            config_path = %path.display(),
            "No config file found, using defaults and environment"
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("CANOPY_").ignore(&["config"]).split("__"))
        .extract()
        .context("failed to load configuration")?;
    Ok(config)
}

/// Connect every store and wire the services.
async fn build_state(config: AppConfig) -> Result<AppState> {
    let blobs = canopy_storage::from_config(&config.storage)
        .await
        .context("failed to initialize blob storage")?;
    blobs
        .health_check()
        .await
        .context("blob storage health check failed")?;
    tracing::info!("Blob storage initialized");

    let cache = canopy_cache::from_config(&config.cache)
        .await
        .context("failed to initialize size cache")?;
    cache
        .health_check()
        .await
        .context("size cache health check failed")?;
    tracing::info!("Size cache initialized");

    let metadata = canopy_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    Ok(AppState::new(config, metadata, cache, blobs))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,canopy_server=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("canopy v{}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(Path::new(&args.config))?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    canopy_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let state = build_state(config.clone()).await?;
    let purge_task = config.cache.purge_interval().map(|interval| {
        tracing::info!(?interval, "Starting size cache purge task");
        canopy_cache::spawn_purge_task(state.cache.clone(), interval)
    });
    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = purge_task {
        task.abort();
    }

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
