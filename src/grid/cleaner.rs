use anyhow::Result;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::{config::load_section, events::EventHandler, gateway::OrderRouter};

#[derive(Debug, Clone, Deserialize)]
pub struct CleanerConfig {
    pub symbol: String,
    #[serde(default = "default_algo_name")]
    pub algo_name: String,
}

fn default_algo_name() -> String {
    "cleaner".to_string()
}

impl CleanerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let cfg: CleanerConfig = load_section(path, "cleaner")?;
        anyhow::ensure!(!cfg.symbol.is_empty(), "symbol must be set");
        Ok(cfg)
    }
}

/// Cancels every open order for one symbol on each timer tick. Places nothing.
pub struct CleanOrderEngine<R> {
    config: CleanerConfig,
    router: R,
}

impl<R: OrderRouter> CleanOrderEngine<R> {
    pub fn new(config: CleanerConfig, router: R) -> Self {
        Self { config, router }
    }

    /// Returns how many cancels were issued.
    pub fn sweep(&self) -> usize {
        let snapshot = self.router.open_orders();
        let mut issued = 0;
        for order in snapshot.for_symbol(&self.config.symbol) {
            if let Some(id) = order.exchange_id {
                self.router.cancel_order(&self.config.algo_name, id);
                issued += 1;
            }
        }
        if issued > 0 {
            info!(algo = %self.config.algo_name, issued, "cancelling open orders");
        }
        issued
    }
}

impl<R: OrderRouter> EventHandler for CleanOrderEngine<R> {
    fn name(&self) -> &str {
        &self.config.algo_name
    }

    fn handle_timer(&mut self) {
        self.sweep();
    }
}
