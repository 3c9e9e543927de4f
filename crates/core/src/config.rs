//! Engine configuration surface.
//!
//! Deliberately narrow: this is the recognised-options table the detection
//! engine consumes, not a multi-deployment/profile/registry loader.
//! Configuration *loading* (file formats, deployment resolution, per-chain
//! registries) is the embedding process's job; this module only validates
//! and freezes the handful of options the engine itself reads, via a
//! serde-default-fn-plus-`OnceLock` shape.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_candidate_max")]
    pub candidate_max: usize,

    #[serde(default = "default_execution_hf_threshold_bps")]
    pub execution_hf_threshold_bps: u32,

    #[serde(default = "default_hysteresis_bps")]
    pub hysteresis_bps: u32,

    #[serde(default = "default_always_include_hf_below")]
    pub always_include_hf_below: f64,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,

    #[serde(default = "default_chunk_retry_attempts")]
    pub chunk_retry_attempts: u32,

    #[serde(default = "default_seed_interval_sec")]
    pub seed_interval_sec: u64,

    #[serde(default = "default_price_trigger_enabled")]
    pub price_trigger_enabled: bool,

    #[serde(default = "default_price_trigger_drop_bps")]
    pub price_trigger_drop_bps: u32,

    #[serde(default = "default_price_trigger_debounce_sec")]
    pub price_trigger_debounce_sec: u64,

    #[serde(default = "default_price_trigger_cumulative")]
    pub price_trigger_cumulative: bool,

    #[serde(default)]
    pub price_trigger_bps_by_asset: HashMap<String, u32>,

    #[serde(default)]
    pub price_trigger_debounce_by_asset: HashMap<String, u64>,

    #[serde(default)]
    pub oracle_feeds: HashMap<String, Address>,

    #[serde(default = "default_run_stall_abort_ms")]
    pub run_stall_abort_ms: u64,
}

fn default_candidate_max() -> usize {
    300
}
fn default_execution_hf_threshold_bps() -> u32 {
    9800
}
fn default_hysteresis_bps() -> u32 {
    20
}
fn default_always_include_hf_below() -> f64 {
    1.10
}
fn default_chunk_size() -> usize {
    120
}
fn default_chunk_timeout_ms() -> u64 {
    2000
}
fn default_chunk_retry_attempts() -> u32 {
    2
}
fn default_seed_interval_sec() -> u64 {
    45
}
fn default_price_trigger_enabled() -> bool {
    true
}
fn default_price_trigger_drop_bps() -> u32 {
    50
}
fn default_price_trigger_debounce_sec() -> u64 {
    5
}
fn default_price_trigger_cumulative() -> bool {
    false
}
fn default_run_stall_abort_ms() -> u64 {
    5000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            candidate_max: default_candidate_max(),
            execution_hf_threshold_bps: default_execution_hf_threshold_bps(),
            hysteresis_bps: default_hysteresis_bps(),
            always_include_hf_below: default_always_include_hf_below(),
            chunk_size: default_chunk_size(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
            chunk_retry_attempts: default_chunk_retry_attempts(),
            seed_interval_sec: default_seed_interval_sec(),
            price_trigger_enabled: default_price_trigger_enabled(),
            price_trigger_drop_bps: default_price_trigger_drop_bps(),
            price_trigger_debounce_sec: default_price_trigger_debounce_sec(),
            price_trigger_cumulative: default_price_trigger_cumulative(),
            price_trigger_bps_by_asset: HashMap::new(),
            price_trigger_debounce_by_asset: HashMap::new(),
            oracle_feeds: HashMap::new(),
            run_stall_abort_ms: default_run_stall_abort_ms(),
        }
    }
}

impl EngineConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn run_stall_abort(&self) -> Duration {
        Duration::from_millis(self.run_stall_abort_ms)
    }

    pub fn seed_interval(&self) -> Duration {
        Duration::from_secs(self.seed_interval_sec)
    }

    pub fn drop_bps_for(&self, symbol: &str) -> u32 {
        self.price_trigger_bps_by_asset
            .get(symbol)
            .copied()
            .unwrap_or(self.price_trigger_drop_bps)
    }

    pub fn debounce_for(&self, symbol: &str) -> Duration {
        let secs = self
            .price_trigger_debounce_by_asset
            .get(symbol)
            .copied()
            .unwrap_or(self.price_trigger_debounce_sec);
        Duration::from_secs(secs)
    }

    /// Build a config from a flat string map, parsing the `SYM:value` /
    /// `SYMBOL:address` override options the same way the comma-separated
    /// wire representations in the recognised-options table describe.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self, EngineError> {
        let mut cfg = Self::default();

        macro_rules! parse_opt {
            ($key:literal, $target:expr, $parse:expr) => {
                if let Some(raw) = options.get($key) {
                    $target = $parse(raw).map_err(|e: String| EngineError::Config {
                        option: $key,
                        reason: e,
                    })?;
                }
            };
        }

        parse_opt!("candidate_max", cfg.candidate_max, |s: &String| s
            .parse::<usize>()
            .map_err(|e| e.to_string()));
        parse_opt!(
            "execution_hf_threshold_bps",
            cfg.execution_hf_threshold_bps,
            |s: &String| s.parse::<u32>().map_err(|e| e.to_string())
        );
        parse_opt!("hysteresis_bps", cfg.hysteresis_bps, |s: &String| s
            .parse::<u32>()
            .map_err(|e| e.to_string()));
        parse_opt!(
            "always_include_hf_below",
            cfg.always_include_hf_below,
            |s: &String| s.parse::<f64>().map_err(|e| e.to_string())
        );
        parse_opt!("chunk_size", cfg.chunk_size, |s: &String| s
            .parse::<usize>()
            .map_err(|e| e.to_string()));
        parse_opt!("chunk_timeout_ms", cfg.chunk_timeout_ms, |s: &String| s
            .parse::<u64>()
            .map_err(|e| e.to_string()));
        parse_opt!(
            "chunk_retry_attempts",
            cfg.chunk_retry_attempts,
            |s: &String| s.parse::<u32>().map_err(|e| e.to_string())
        );
        parse_opt!("seed_interval_sec", cfg.seed_interval_sec, |s: &String| s
            .parse::<u64>()
            .map_err(|e| e.to_string()));
        parse_opt!(
            "price_trigger_enabled",
            cfg.price_trigger_enabled,
            |s: &String| s.parse::<bool>().map_err(|e| e.to_string())
        );
        parse_opt!(
            "price_trigger_drop_bps",
            cfg.price_trigger_drop_bps,
            |s: &String| s.parse::<u32>().map_err(|e| e.to_string())
        );
        parse_opt!(
            "price_trigger_debounce_sec",
            cfg.price_trigger_debounce_sec,
            |s: &String| s.parse::<u64>().map_err(|e| e.to_string())
        );
        parse_opt!(
            "price_trigger_cumulative",
            cfg.price_trigger_cumulative,
            |s: &String| s.parse::<bool>().map_err(|e| e.to_string())
        );
        parse_opt!("run_stall_abort_ms", cfg.run_stall_abort_ms, |s: &String| s
            .parse::<u64>()
            .map_err(|e| e.to_string()));

        if let Some(raw) = options.get("price_trigger_bps_by_asset") {
            cfg.price_trigger_bps_by_asset = parse_sym_value_map(raw, "price_trigger_bps_by_asset")?;
        }
        if let Some(raw) = options.get("price_trigger_debounce_by_asset") {
            cfg.price_trigger_debounce_by_asset =
                parse_sym_value_map(raw, "price_trigger_debounce_by_asset")?;
        }
        if let Some(raw) = options.get("oracle_feeds") {
            cfg.oracle_feeds = parse_oracle_feeds(raw)?;
        }

        Ok(cfg)
    }

    pub fn log_config(&self) {
        tracing::info!(
            candidate_max = self.candidate_max,
            execution_hf_threshold_bps = self.execution_hf_threshold_bps,
            hysteresis_bps = self.hysteresis_bps,
            always_include_hf_below = self.always_include_hf_below,
            "candidate manager configured"
        );
        tracing::info!(
            chunk_size = self.chunk_size,
            chunk_timeout_ms = self.chunk_timeout_ms,
            chunk_retry_attempts = self.chunk_retry_attempts,
            run_stall_abort_ms = self.run_stall_abort_ms,
            "batch reader configured"
        );
        tracing::info!(
            enabled = self.price_trigger_enabled,
            drop_bps = self.price_trigger_drop_bps,
            debounce_sec = self.price_trigger_debounce_sec,
            cumulative = self.price_trigger_cumulative,
            overrides = self.price_trigger_bps_by_asset.len(),
            feeds = self.oracle_feeds.len(),
            "price trigger configured"
        );
    }
}

fn parse_sym_value_map<T>(raw: &str, option: &'static str) -> Result<HashMap<String, T>, EngineError>
where
    T: std::str::FromStr,
{
    let mut map = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (sym, value) = pair.split_once(':').ok_or_else(|| EngineError::Config {
            option,
            reason: format!("expected SYM:value, got `{pair}`"),
        })?;
        let parsed = value.parse::<T>().map_err(|_| EngineError::Config {
            option,
            reason: format!("invalid value in `{pair}`"),
        })?;
        map.insert(sym.to_string(), parsed);
    }
    Ok(map)
}

fn parse_oracle_feeds(raw: &str) -> Result<HashMap<String, Address>, EngineError> {
    let mut map = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (sym, addr) = pair.split_once(':').ok_or_else(|| EngineError::Config {
            option: "oracle_feeds",
            reason: format!("expected SYMBOL:address, got `{pair}`"),
        })?;
        let parsed: Address = addr.parse().map_err(|_| EngineError::Config {
            option: "oracle_feeds",
            reason: format!("invalid address in `{pair}`"),
        })?;
        map.insert(sym.to_string(), parsed);
    }
    Ok(map)
}

static GLOBAL_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

pub fn init_config(config: EngineConfig) {
    let _ = GLOBAL_CONFIG.set(config);
}

pub fn config() -> &'static EngineConfig {
    GLOBAL_CONFIG.get_or_init(EngineConfig::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.candidate_max, 300);
        assert_eq!(cfg.execution_hf_threshold_bps, 9800);
    }

    #[test]
    fn test_from_options_overrides() {
        let mut options = HashMap::new();
        options.insert("candidate_max".to_string(), "50".to_string());
        options.insert("hysteresis_bps".to_string(), "30".to_string());
        let cfg = EngineConfig::from_options(&options).unwrap();
        assert_eq!(cfg.candidate_max, 50);
        assert_eq!(cfg.hysteresis_bps, 30);
        assert_eq!(cfg.chunk_size, 120); // untouched default
    }

    #[test]
    fn test_per_asset_overrides() {
        let mut options = HashMap::new();
        options.insert(
            "price_trigger_bps_by_asset".to_string(),
            "WETH:30,WBTC:40".to_string(),
        );
        let cfg = EngineConfig::from_options(&options).unwrap();
        assert_eq!(cfg.drop_bps_for("WETH"), 30);
        assert_eq!(cfg.drop_bps_for("WBTC"), 40);
        assert_eq!(cfg.drop_bps_for("USDC"), cfg.price_trigger_drop_bps);
    }

    #[test]
    fn test_malformed_override_is_rejected() {
        let mut options = HashMap::new();
        options.insert("price_trigger_bps_by_asset".to_string(), "WETH".to_string());
        assert!(EngineConfig::from_options(&options).is_err());
    }

    #[test]
    fn test_oracle_feeds_parsing() {
        let mut options = HashMap::new();
        options.insert(
            "oracle_feeds".to_string(),
            "WETH:0x0000000000000000000000000000000000000001".to_string(),
        );
        let cfg = EngineConfig::from_options(&options).unwrap();
        assert_eq!(cfg.oracle_feeds.len(), 1);
        assert!(cfg.oracle_feeds.contains_key("WETH"));
    }
}
