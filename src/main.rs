//! Windsurf Server
//!
//! Campus sustainability platform backend

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use windsurf::{Config, MemStorage, PgStorage, Store};

#[derive(Parser, Debug)]
#[command(name = "windsurf-server", about = "Campus sustainability platform backend")]
struct Args {
    /// Bind host (overrides config.toml)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides config.toml)
    #[arg(long)]
    port: Option<u16>,

    /// PostgreSQL connection string; falls back to in-memory storage when unset
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Snapshot file for the in-memory store (ignored with --database-url)
    #[arg(long)]
    data_file: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load()?;

    info!("Starting Windsurf Server");

    let store: Arc<dyn Store> = match &args.database_url {
        Some(url) => {
            let storage = PgStorage::new(url).await?;
            info!("PostgreSQL storage initialized");
            Arc::new(storage)
        }
        None => match &args.data_file {
            Some(path) => {
                let storage = MemStorage::open(path)?;
                info!("In-memory storage initialized from {}", path);
                Arc::new(storage)
            }
            None => {
                info!("In-memory storage initialized (no persistence)");
                Arc::new(MemStorage::new())
            }
        },
    };

    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);

    windsurf::server::run_server(
        &host,
        port,
        store,
        config.jwt_secret(),
        config.feed.page_size,
    )
    .await?;

    Ok(())
}
