use std::{env, fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize};

use crate::{fmex_client::RestOptions, types::Venue, ws_client::WsConfig};

/// Credentials and connection settings, read from a `[connection]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub server: Venue,
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default)]
    pub proxy_port: Option<u16>,
    #[serde(default = "default_session_number")]
    pub session_number: usize,
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    #[serde(default = "default_depth_levels")]
    pub depth_levels: u32,
    #[serde(default = "default_snapshot_depth")]
    pub snapshot_depth: usize,
    #[serde(default = "default_heartbeat_ticks")]
    pub heartbeat_ticks: u32,
    #[serde(default = "default_ws_client_id")]
    pub ws_client_id: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_sec: u32,
    #[serde(default = "default_true")]
    pub subscribe_ticker: bool,
    /// Overrides the venue's REST base URL.
    #[serde(default)]
    pub rest_host: Option<String>,
    /// Overrides the venue's stream URL.
    #[serde(default)]
    pub ws_host: Option<String>,
}

fn default_session_number() -> usize {
    3
}

fn default_symbols() -> Vec<String> {
    vec!["BTCUSD_P".to_string()]
}

fn default_depth_levels() -> u32 {
    20
}

fn default_snapshot_depth() -> usize {
    10
}

fn default_heartbeat_ticks() -> u32 {
    10
}

fn default_ws_client_id() -> String {
    "fmex-connector".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_rate_limit() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

impl ConnectionConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg: ConnectionConfig = load_section(path, "connection")?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(data: &str) -> Result<Self> {
        let cfg: ConnectionConfig = parse_section(data, "connection")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        // Credentials are usually kept out of the file.
        override_string("FMEX_API_KEY", &mut self.api_key);
        override_string("FMEX_API_SECRET", &mut self.api_secret);
        if let Ok(value) = env::var("FMEX_SERVER") {
            match value.to_ascii_lowercase().as_str() {
                "real" => self.server = Venue::Real,
                "test" => self.server = Venue::Test,
                _ => {}
            }
        }
        if let Ok(host) = env::var("FMEX_PROXY_HOST") {
            self.proxy_host = Some(host);
        }
        if let Ok(port) = env::var("FMEX_PROXY_PORT") {
            if let Ok(port) = port.parse() {
                self.proxy_port = Some(port);
            }
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.api_key.is_empty(), "api_key must be set");
        anyhow::ensure!(!self.api_secret.is_empty(), "api_secret must be set");
        anyhow::ensure!(
            (1..=32).contains(&self.session_number),
            "session_number must be between 1 and 32"
        );
        anyhow::ensure!(!self.symbols.is_empty(), "at least one symbol is required");
        anyhow::ensure!(
            self.snapshot_depth > 0 && self.snapshot_depth <= self.depth_levels as usize,
            "snapshot_depth must be within 1..=depth_levels"
        );
        anyhow::ensure!(self.heartbeat_ticks > 0, "heartbeat_ticks must be positive");
        anyhow::ensure!(
            self.rate_limit_per_sec > 0,
            "rate_limit_per_sec must be positive"
        );
        Ok(())
    }

    /// The symbol used when an order payload omits one.
    pub fn default_symbol(&self) -> &str {
        self.symbols.first().map(String::as_str).unwrap_or("BTCUSD_P")
    }

    /// `http://host:port` when both proxy fields are present.
    pub fn proxy_url(&self) -> Option<String> {
        match (self.proxy_host.as_deref(), self.proxy_port) {
            (Some(host), Some(port)) if !host.is_empty() && port > 0 => {
                Some(format!("http://{host}:{port}"))
            }
            _ => None,
        }
    }

    pub fn rest_host(&self) -> &str {
        self.rest_host
            .as_deref()
            .unwrap_or_else(|| self.server.rest_host())
    }

    pub fn ws_host(&self) -> &str {
        self.ws_host.as_deref().unwrap_or_else(|| self.server.ws_host())
    }

    pub fn rest_options(&self) -> RestOptions {
        RestOptions {
            proxy: self.proxy_url(),
            timeout: Duration::from_millis(self.request_timeout_ms),
            ..RestOptions::default()
        }
    }

    pub fn ws_config(&self) -> WsConfig {
        WsConfig {
            url: self.ws_host().to_string(),
            symbols: self.symbols.clone(),
            depth_levels: self.depth_levels,
            snapshot_depth: self.snapshot_depth,
            subscribe_ticker: self.subscribe_ticker,
            client_id: self.ws_client_id.clone(),
            ..WsConfig::default()
        }
    }
}

/// Reads one table of a TOML file, falling back to top-level keys when the
/// table is absent.
pub(crate) fn load_section<T: DeserializeOwned>(path: impl AsRef<Path>, section: &str) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    parse_section(&data, section)
}

pub(crate) fn parse_section<T: DeserializeOwned>(data: &str, section: &str) -> Result<T> {
    let raw: toml::Value = toml::from_str(data).with_context(|| "Failed to parse TOML config")?;
    let table = match raw.get(section) {
        Some(table) => table.clone(),
        None => raw,
    };
    table
        .try_into()
        .with_context(|| format!("Invalid [{section}] config structure"))
}

pub(crate) fn override_string(key: &str, field: &mut String) {
    if let Ok(value) = env::var(key) {
        if !value.is_empty() {
            *field = value;
        }
    }
}

pub(crate) fn override_f64(key: &str, field: &mut f64) {
    if let Ok(value) = env::var(key) {
        if let Ok(parsed) = value.parse::<f64>() {
            *field = parsed;
        }
    }
}

pub(crate) fn override_usize(key: &str, field: &mut usize) {
    if let Ok(value) = env::var(key) {
        if let Ok(parsed) = value.parse::<usize>() {
            *field = parsed;
        }
    }
}

pub(crate) fn override_u32(key: &str, field: &mut u32) {
    if let Ok(value) = env::var(key) {
        if let Ok(parsed) = value.parse::<u32>() {
            *field = parsed;
        }
    }
}
