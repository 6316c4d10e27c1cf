//! Cosmos Database - memoized Azure Cosmos database handles
//!
//! Composition root running the database utility against the in-memory
//! emulator: opens the configured database, reports cache statistics and
//! disposes everything on shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cosmos_database::cosmos::{CosmosEmulator, EmulatorClientProvider, EmulatorDatabaseSetup};
use cosmos_database::{Config, CosmosServices};

/// Main entry point.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Register the database utility against the emulator
/// 4. Open the default database
/// 5. Wait for Ctrl+C, then dispose
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cosmos_database=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Cosmos database utility");

    let config = Config::from_env().context("loading Azure:Cosmos configuration")?;
    info!("Configuration loaded: {:?}", config);

    let emulator = CosmosEmulator::new();
    emulator.add_account(config.endpoint.as_str(), config.account_key.as_str());

    let services = CosmosServices::new(
        config.clone(),
        Arc::new(EmulatorClientProvider::new(Arc::clone(&emulator))),
    )?;
    let util = services.add_cosmos_database_util(Arc::new(EmulatorDatabaseSetup::new(
        Arc::clone(&emulator),
    )))?;

    let shutdown = CancellationToken::new();
    let database = util
        .get(&shutdown)
        .await
        .with_context(|| format!("opening database {}", config.database_name))?;
    info!(
        "Database {} ready; databases on endpoint: {:?}",
        database.id(),
        emulator.databases(&config.endpoint)
    );
    info!("Cache stats: {}", serde_json::to_string(&util.stats())?);

    signal::ctrl_c()
        .await
        .context("installing Ctrl+C handler")?;
    warn!("Received Ctrl+C, shutting down...");

    shutdown.cancel();
    services.dispose();
    info!("Shutdown complete");
    Ok(())
}
