use anyhow::Result;
use serde::Deserialize;
use std::path::Path;

use crate::config::{load_section, override_f64, override_u32, override_usize, parse_section};

#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_algo_name")]
    pub algo_name: String,
    /// Contracts per ladder order.
    pub volume: f64,
    /// Timer ticks between evaluations.
    #[serde(default = "default_interval")]
    pub interval: u32,
    /// Offset of the first rung from the touch.
    pub minimum_distance: f64,
    /// Rungs per side.
    pub ladder_depth: usize,
    #[serde(default = "default_band_width")]
    pub band_width: f64,
    #[serde(default = "default_cancel_tolerance")]
    pub cancel_tolerance: f64,
    #[serde(default = "default_ladder_step")]
    pub ladder_step: f64,
    #[serde(default = "default_min_headroom")]
    pub min_headroom: usize,
    #[serde(default = "default_runaway_margin")]
    pub runaway_margin: usize,
}

fn default_symbol() -> String {
    "BTCUSD_P".to_string()
}

fn default_algo_name() -> String {
    "grid".to_string()
}

fn default_interval() -> u32 {
    2
}

fn default_band_width() -> f64 {
    15.0
}

fn default_cancel_tolerance() -> f64 {
    5.0
}

fn default_ladder_step() -> f64 {
    0.5
}

fn default_min_headroom() -> usize {
    4
}

fn default_runaway_margin() -> usize {
    4
}

impl GridConfig {
    /// Config with the stock band constants.
    pub fn new(
        symbol: impl Into<String>,
        volume: f64,
        interval: u32,
        minimum_distance: f64,
        ladder_depth: usize,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            algo_name: default_algo_name(),
            volume,
            interval,
            minimum_distance,
            ladder_depth,
            band_width: default_band_width(),
            cancel_tolerance: default_cancel_tolerance(),
            ladder_step: default_ladder_step(),
            min_headroom: default_min_headroom(),
            runaway_margin: default_runaway_margin(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg: GridConfig = load_section(path, "grid")?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(data: &str) -> Result<Self> {
        let cfg: GridConfig = parse_section(data, "grid")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        override_f64("GRID_VOLUME", &mut self.volume);
        override_u32("GRID_INTERVAL", &mut self.interval);
        override_f64("GRID_MINIMUM_DISTANCE", &mut self.minimum_distance);
        override_usize("GRID_LADDER_DEPTH", &mut self.ladder_depth);
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.symbol.is_empty(), "symbol must be set");
        anyhow::ensure!(self.interval >= 1, "interval must be at least 1 tick");
        anyhow::ensure!(self.volume >= 0.0, "volume must be non-negative");
        anyhow::ensure!(
            self.minimum_distance >= 0.0,
            "minimum_distance must be non-negative"
        );
        anyhow::ensure!(self.ladder_depth >= 1, "ladder_depth must be at least 1");
        anyhow::ensure!(self.ladder_step > 0.0, "ladder_step must be positive");
        anyhow::ensure!(
            self.band_width >= 0.0 && self.cancel_tolerance >= 0.0,
            "band_width and cancel_tolerance must be non-negative"
        );
        Ok(())
    }

    /// Open-order count above which everything is cancelled.
    pub fn runaway_threshold(&self) -> usize {
        2 * self.ladder_depth + self.runaway_margin
    }
}
