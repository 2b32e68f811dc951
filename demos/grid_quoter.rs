//! Runs the grid quoter against FMEX.
//!
//! Usage: `cargo run --example grid_quoter -- [config.toml]`
//!
//! Credentials come from `[connection]` in the config file or from
//! `FMEX_API_KEY` / `FMEX_API_SECRET`. Grid parameters can be overridden with
//! `GRID_*` variables. `RUST_LOG` controls verbosity.

use std::time::Duration;

use anyhow::Result;
use fmex_connector::{
    ConnectionConfig, EventEngine, FmexGateway, GatewayEvent, GridConfig, GridEngine,
};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let connection = ConnectionConfig::from_file(&path)?;
    let grid = GridConfig::from_file(&path)?;
    info!(
        symbol = %grid.symbol,
        depth = grid.ladder_depth,
        distance = grid.minimum_distance,
        volume = grid.volume,
        venue = ?connection.server,
        "starting grid quoter"
    );

    let (events_tx, events_rx) = mpsc::unbounded_channel::<GatewayEvent>();
    let (handle, gateway_task) = FmexGateway::spawn(&connection, events_tx)?;

    let mut engine = EventEngine::new(Duration::from_secs(1)).with_gateway(handle.clone());
    engine.register(Box::new(GridEngine::new(grid, handle.clone())));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_task = tokio::spawn(engine.run(events_rx, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("ctrl-c received, shutting down");

    shutdown_tx.send(true).ok();
    handle.shutdown();
    if let Err(err) = engine_task.await {
        warn!("engine task failed: {err}");
    }
    if let Err(err) = gateway_task.await {
        warn!("gateway task failed: {err}");
    }
    Ok(())
}
