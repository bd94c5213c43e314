//! YAML configuration file.
//!
//! ```yaml
//! app:      { env: dev, name: chainwatch }
//! chain:    { rpc_url: "https://…", contract_address: "0x…" }
//! database: { url: "sqlite:./chainwatch.db?mode=rwc" }
//! indexer:  { lookback: 50, queue_capacity: 10 }
//! log:      { level: info, json: false }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use chainwatch_core::indexer::IndexerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub env: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSettings {
    pub rpc_url: String,
    /// Token whose `Transfer` events are tracked.
    pub contract_address: String,
    /// Refuse to start against a node on another chain.
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl ChainSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// `sqlite:` URL or path, `postgres://` URL, or `memory`.
    #[serde(alias = "dsn")]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directives; defaults by `app.env` when absent.
    pub level: Option<String>,
    pub json: bool,
}

impl LogSettings {
    /// The filter to use when `RUST_LOG` is not set.
    pub fn directives(&self, env: &str) -> String {
        match &self.level {
            Some(level) => level.clone(),
            None if env.eq_ignore_ascii_case("dev") => "debug".into(),
            None => "info".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSettings,
    pub chain: ChainSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub log: LogSettings,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.chain.rpc_url.trim().is_empty() {
            bail!("chain.rpc_url is empty");
        }
        let addr = &self.chain.contract_address;
        let well_formed = addr
            .strip_prefix("0x")
            .is_some_and(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()));
        if !well_formed {
            bail!("chain.contract_address {addr:?} is not a 20-byte hex address");
        }
        if self.database.url.trim().is_empty() {
            bail!("database.url is empty");
        }
        if self.indexer.queue_capacity == 0 {
            bail!("indexer.queue_capacity must be at least 1");
        }
        Ok(())
    }
}
