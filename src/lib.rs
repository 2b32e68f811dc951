//! FMEX perpetual-contract connector with a grid quoting engine.
//!
//! The connector side signs REST calls ([`fmex_client`]), streams depth and
//! ticker data ([`ws_client`]) and keeps one authoritative view of open
//! orders ([`reconciler`]) behind a single-writer [`gateway`] task. The
//! [`grid`] module hosts strategies on top of it through [`events`].

pub mod config;
pub mod errors;
pub mod events;
pub mod fmex_client;
pub mod gateway;
pub mod grid;
pub mod models;
pub mod order_ids;
pub mod reconciler;
pub mod types;
pub mod ws_client;

pub use config::ConnectionConfig;
pub use errors::{ReconcileError, ReconcileResult, WsClientError, WsResult};
pub use events::{EventEngine, EventHandler, GatewayEvent};
pub use fmex_client::{
    Error as FmexError, RequestSigner, RestClient, RestOptions, Result as FmexResult, Transport,
};
pub use gateway::{FmexGateway, GatewayHandle, OrderRouter};
pub use grid::{CleanOrderEngine, CleanerConfig, GridConfig, GridDecision, GridEngine, GridStrategy};
pub use models::{AccountBalance, Contract, OpenOrders, Order, OrderRequest};
pub use order_ids::LocalOrderIds;
pub use reconciler::OrderReconciler;
pub use types::{Direction, ExchangeOrderId, LocalOrderId, OrderStatus, OrderType, Venue};
pub use ws_client::{
    ExponentialBackoff, MarketDataStream, PriceLevel, QuoteSnapshot, StreamEvent, StreamHandle,
    WsConfig,
};

/// Installs a compact `tracing` subscriber honouring `RUST_LOG`, falling back
/// to `default_filter`.
#[cfg(feature = "logging")]
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .try_init();
}
