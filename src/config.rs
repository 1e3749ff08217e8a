//! Startup configuration (spec.md section 6).
//!
//! Loaded from a YAML file; `api_key` may be overridden by the
//! `MARKET_DATA_API_KEY` environment variable.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

fn default_api_key() -> String {
    String::new()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_max_daily_loss() -> f64 {
    -10_000.0
}

fn default_max_order_rate() -> u64 {
    1_000
}

fn default_scheduler_tick_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Short key -> full ticker. One order book per entry.
    pub symbols: HashMap<String, String>,

    #[serde(default = "default_api_key")]
    pub api_key: String,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,

    #[serde(default = "default_max_order_rate")]
    pub max_order_rate: u64,

    #[serde(default = "default_scheduler_tick_secs")]
    pub scheduler_tick_secs: u64,
}

impl Config {
    /// Load from a YAML file, then apply the `MARKET_DATA_API_KEY`
    /// environment override if it is set.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut cfg: Config =
            serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        if let Ok(env_key) = std::env::var("MARKET_DATA_API_KEY") {
            if !env_key.is_empty() {
                cfg.api_key = env_key;
            }
        }
        Ok(cfg)
    }

    pub fn symbol_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.symbols.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_yaml_and_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "symbols:\n  AAPL: AAPL.O\n  MSFT: MSFT.O\napi_key: \"file-key\"\n"
        )
        .unwrap();
        std::env::remove_var("MARKET_DATA_API_KEY");
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.api_key, "file-key");
        assert_eq!(cfg.symbol_keys(), vec!["AAPL".to_string(), "MSFT".to_string()]);
        assert_eq!(cfg.heartbeat_interval_secs, 30);
        assert_eq!(cfg.max_order_rate, 1_000);
    }

    #[test]
    fn env_override_wins_over_file_value() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "symbols:\n  AAPL: AAPL.O\napi_key: \"file-key\"\n").unwrap();
        std::env::set_var("MARKET_DATA_API_KEY", "env-key");
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.api_key, "env-key");
        std::env::remove_var("MARKET_DATA_API_KEY");
    }
}
