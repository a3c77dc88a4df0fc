//! silo-server binary — REST API for the bulk ingestion and extraction
//! service.

mod config;
mod metrics;
mod routes;
mod state;
mod sweeper;

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use silo_store::{PgStore, Store};

use config::ServerConfig;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ServerConfig::from_env()?;
    info!("Starting silo-server");

    std::fs::create_dir_all(&config.uploads_dir)?;
    std::fs::create_dir_all(&config.exports_dir)?;

    let store: Arc<dyn Store> = Arc::new(PgStore::connect(&config.database_url).await?);
    info!("Connected to database");

    let state = Arc::new(AppState::new(store, config.clone()));

    sweeper::spawn_sweeper(state.clone());
    info!("Sweeper started (interval: {}s)", config.sweep_interval_secs);

    let app = routes::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
