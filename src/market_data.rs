//! Market-data collaborator (spec.md section 6): `get_latest_price`, backed
//! by an HTTP intraday endpoint with an on-disk JSON cache fallback.
//!
//! Modeled on the REST-collaborator pattern used elsewhere in this
//! codebase: a `reqwest::Client` built once with an explicit timeout, a
//! `reqwest::Client::builder()` setup, and `anyhow::Context` at the
//! boundary. The core (`exchange`, `strategy`, `scheduler`) depends only on
//! the `MarketDataClient` trait — never directly on `reqwest` or the cache
//! file layout.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const FETCH_TIMEOUT_SECS: u64 = 10;
const CACHE_EXPIRY_SECS: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    price: f64,
    fetched_at_epoch_secs: i64,
}

/// `{api_calls_today, last_call_date}` persisted under `logs/` (spec.md
/// section 6). Not part of the core's invariants; tracked only so the
/// collaborator can be rate-limit-aware across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCallCounter {
    pub api_calls_today: u64,
    pub last_call_date: String,
}

impl ApiCallCounter {
    fn load(path: &Path) -> Self {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(ApiCallCounter { api_calls_today: 0, last_call_date: String::new() })
    }

    fn save(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = std::fs::write(path, json);
        }
    }

    fn record_call(&mut self, today: &str) {
        if self.last_call_date != today {
            self.api_calls_today = 0;
            self.last_call_date = today.to_string();
        }
        self.api_calls_today += 1;
    }
}

/// The interface the core depends on (spec.md section 6: "The core depends
/// only on the interface").
pub trait MarketDataClient: Send + Sync {
    fn get_latest_price(&self, symbol: &str) -> Option<f64>;
}

/// HTTP client with a 10s timeout and an on-disk 1h-expiry cache fallback
/// (spec.md section 6, 5: "the external market-data call has a
/// 10-second timeout; on timeout or non-200 response, the reseed is
/// skipped for that tick").
pub struct RestMarketDataClient {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    cache_dir: PathBuf,
    counter_path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct IntradayResponse {
    price: f64,
}

impl RestMarketDataClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, logs_dir: impl Into<PathBuf>) -> Result<Self> {
        let logs_dir = logs_dir.into();
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .context("building market-data HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            cache_dir: logs_dir.join("market_data_cache"),
            counter_path: logs_dir.join("api_calls_today.json"),
        })
    }

    fn cache_path(&self, symbol: &str) -> PathBuf {
        self.cache_dir.join(format!("{symbol}.json"))
    }

    fn read_cache(&self, symbol: &str, now_epoch_secs: i64) -> Option<f64> {
        let raw = std::fs::read_to_string(self.cache_path(symbol)).ok()?;
        let entry: CacheEntry = serde_json::from_str(&raw).ok()?;
        if now_epoch_secs - entry.fetched_at_epoch_secs <= CACHE_EXPIRY_SECS {
            Some(entry.price)
        } else {
            None
        }
    }

    fn write_cache(&self, symbol: &str, price: f64, now_epoch_secs: i64) {
        let _ = std::fs::create_dir_all(&self.cache_dir);
        let entry = CacheEntry { price, fetched_at_epoch_secs: now_epoch_secs };
        if let Ok(json) = serde_json::to_string(&entry) {
            let _ = std::fs::write(self.cache_path(symbol), json);
        }
    }

    fn fetch_live(&self, symbol: &str) -> Result<f64> {
        let url = format!("{}/intraday/{}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .context("sending intraday price request")?;
        if !resp.status().is_success() {
            anyhow::bail!("non-200 response: {}", resp.status());
        }
        let parsed: IntradayResponse = resp.json().context("parsing intraday response body")?;
        Ok(parsed.price)
    }
}

impl MarketDataClient for RestMarketDataClient {
    fn get_latest_price(&self, symbol: &str) -> Option<f64> {
        let now = chrono::Utc::now();
        let now_epoch = now.timestamp();
        let today = now.format("%Y-%m-%d").to_string();

        match self.fetch_live(symbol) {
            Ok(price) => {
                self.write_cache(symbol, price, now_epoch);
                let mut counter = ApiCallCounter::load(&self.counter_path);
                counter.record_call(&today);
                counter.save(&self.counter_path);
                Some(price)
            }
            Err(e) => {
                warn!(symbol, error = %e, "market-data fetch failed, falling back to cache");
                let cached = self.read_cache(symbol, now_epoch);
                if cached.is_none() {
                    debug!(symbol, "no usable cache entry; reseed will be skipped this tick");
                }
                cached
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_resets_on_new_day() {
        let mut counter = ApiCallCounter { api_calls_today: 5, last_call_date: "2026-01-01".into() };
        counter.record_call("2026-01-02");
        assert_eq!(counter.api_calls_today, 1);
        assert_eq!(counter.last_call_date, "2026-01-02");
    }

    #[test]
    fn counter_accumulates_within_same_day() {
        let mut counter = ApiCallCounter { api_calls_today: 5, last_call_date: "2026-01-01".into() };
        counter.record_call("2026-01-01");
        assert_eq!(counter.api_calls_today, 6);
    }

    #[test]
    fn cache_round_trips_within_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let client = RestMarketDataClient::new("http://localhost", "key", dir.path()).unwrap();
        client.write_cache("AAPL", 123.45, 1_000);
        assert_eq!(client.read_cache("AAPL", 1_000 + 3_600), Some(123.45));
        assert_eq!(client.read_cache("AAPL", 1_000 + 3_601), None);
    }
}
