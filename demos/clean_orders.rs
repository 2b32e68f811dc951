//! Cancels every resting order for one symbol, then exits once none are left.
//!
//! Usage: `cargo run --example clean_orders -- [config.toml]`

use std::time::Duration;

use anyhow::Result;
use fmex_connector::{
    CleanOrderEngine, CleanerConfig, ConnectionConfig, EventEngine, FmexGateway, OrderRouter,
};
use tokio::sync::{mpsc, watch};
use tracing::info;
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
    let cleaner = CleanerConfig::from_file(&path)?;
    let symbol = cleaner.symbol.clone();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (handle, gateway_task) = FmexGateway::spawn(&connection, events_tx)?;

    let mut engine = EventEngine::new(Duration::from_secs(1)).with_gateway(handle.clone());
    engine.register(Box::new(CleanOrderEngine::new(cleaner, handle.clone())));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine_task = tokio::spawn(engine.run(events_rx, shutdown_rx));

    // Give the startup poll a chance to land before judging the book empty.
    tokio::time::sleep(Duration::from_secs(3)).await;
    loop {
        let remaining = handle.open_orders().for_symbol(&symbol).count();
        if remaining == 0 {
            break;
        }
        info!(symbol = %symbol, remaining, "waiting for cancels");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    info!(symbol = %symbol, "no open orders left");

    shutdown_tx.send(true).ok();
    handle.shutdown();
    let _ = engine_task.await;
    let _ = gateway_task.await;
    Ok(())
}
