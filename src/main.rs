use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shortener::api;
use shortener::config::{Config, ConfigOverrides, StorageBackend, StorageConfig};
use shortener::identity::IdentityCodec;
use shortener::storage::{
    DeletionQueueConfig, FileStorage, MemoryStorage, PostgresStorage, RelationalOptions,
    SqliteStorage, Storage,
};

#[derive(Parser)]
#[command(name = "shortener")]
#[command(about = "URL shortener server", long_about = None)]
struct Cli {
    /// Address to listen on
    #[arg(short = 'a')]
    server_address: Option<String>,
    /// Base URL of the short links
    #[arg(short = 'b')]
    base_url: Option<String>,
    /// Path of the append-only URL log
    #[arg(short = 'f')]
    file_storage_path: Option<String>,
    /// Database DSN (postgres:// or sqlite:)
    #[arg(short = 'd')]
    database_dsn: Option<String>,
}

impl From<Cli> for ConfigOverrides {
    fn from(cli: Cli) -> Self {
        Self {
            server_address: cli.server_address,
            base_url: cli.base_url,
            file_storage_path: cli.file_storage_path,
            database_dsn: cli.database_dsn,
        }
    }
}

async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>> {
    let options = RelationalOptions {
        max_connections: config.database.max_connections,
        timeout: Duration::from_millis(config.database.timeout_ms),
        deletion: DeletionQueueConfig {
            capacity: config.database.delete_queue_capacity,
            max_batch: config.database.delete_batch_size,
        },
    };

    let storage: Arc<dyn Storage> = match &config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Arc::new(MemoryStorage::new())
        }
        StorageBackend::File { path } => {
            let storage = FileStorage::open(path).await?;
            info!("Using file storage: {}", storage.path().display());
            Arc::new(storage)
        }
        StorageBackend::Sqlite { url } => {
            info!("Using SQLite storage: {}", url);
            Arc::new(SqliteStorage::new(url, options).await?)
        }
        StorageBackend::Postgres { url } => {
            // The DSN may carry credentials.
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(url, options).await?)
        }
    };

    Ok(storage)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load(Cli::parse().into())?;
    info!("Loaded configuration");

    let storage = open_storage(&config.storage).await?;

    info!("Initializing storage...");
    storage.init().await?;
    info!("Storage initialized successfully");

    let codec = Arc::new(IdentityCodec::new(&config.identity.secret)?);
    let router = api::create_router(Arc::clone(&storage), codec, config.base_url.clone());

    let listener = tokio::net::TcpListener::bind(&config.server_address).await?;
    info!("🚀 Server listening on http://{}", config.server_address);
    info!("   - Short links served under {}", config.base_url);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining pending deletions...");
    storage.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}
