//! Sculpin vector collection server.

use clap::Parser;
use sculpin_api::{create_router, AppState};
use sculpin_core::SculpinConfig;
use sculpin_query::{Catalog, OperatorRegistry};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sculpin-server")]
#[command(about = "Sculpin vector collection server")]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for collections; in memory when unset
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Address to bind the server to
    #[arg(long)]
    bind_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sculpin_api=info,sculpin_query=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SculpinConfig::from_file(path).map_err(anyhow::Error::msg)?,
        None => SculpinConfig::default(),
    };
    if let Some(dir) = args.data_dir {
        config.server.data_dir = Some(dir);
    }
    if let Some(addr) = args.bind_addr {
        config.server.bind_addr = addr;
    }
    config.validate().map_err(anyhow::Error::msg)?;

    let registry = Arc::new(OperatorRegistry::builtin());
    tracing::info!("Ingest operators: {}", registry.names().join(", "));

    let catalog = match &config.server.data_dir {
        Some(dir) => {
            tracing::info!("Opening catalog at {:?}", dir);
            Catalog::open(dir, registry)?
        }
        None => {
            tracing::info!("No data directory configured, collections live in memory");
            Catalog::in_memory(registry)
        }
    };

    let state = AppState::new(Arc::new(catalog), &config);
    let app = create_router(state, config.server.body_limit_bytes);

    let addr: SocketAddr = config.server.bind_addr.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
