//! EcoCatalyst Sync Server
//!
//! Reference backend for the remote store: a keyed data tree served over
//! WebSocket with live subscriptions.
//!
//! # Configuration
//!
//! Environment variables:
//! - `ECOCATALYST_PORT`: Port to listen on (default: 8080)
//! - `ECOCATALYST_DATA_DIR`: Directory holding `tree.json` (default: ~/.local/share/ecocatalyst-server)
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint
//! - `GET /ws`: Sync protocol (CBOR frames over WebSocket)

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ecocatalyst::server::{router, AppState, TreeStorage};

/// Server configuration
#[derive(Debug, Clone)]
struct Config {
    /// Port to listen on
    port: u16,
    /// Directory holding the persisted tree
    data_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        let port = std::env::var("ECOCATALYST_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let data_dir = std::env::var("ECOCATALYST_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("ecocatalyst-server")
            });

        Self { port, data_dir }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ecocatalyst=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(Config::from_env()).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(&config.data_dir)
        .map_err(|e| format!("Failed to create data directory: {}", e))?;
    tracing::info!("Data directory: {}", config.data_dir.display());

    let state = AppState::load(TreeStorage::new(&config.data_dir))?;
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
