//! Typed configuration documents for the CrossDesk engine.
//!
//! All config files are JSON. Loading is strict: a missing required key is a
//! fatal [`ConfigError`] — the process must refuse to start live trading on
//! a bad config. Optional keys fall back to the documented defaults via
//! `#[serde(default)]`.
//!
//! Strategy definitions may omit `id`; a stable identifier is then derived
//! from the strategy name (SHA-256 folded into a UUID) so ids survive
//! restarts without being stored.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub mod strategies;

pub use strategies::{
    ScannerConfig, StrategyConfigDoc, StrategyDefinition, StrategyTimeframes, StrategyType,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal configuration errors. The CLI maps these to exit code 1.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Io { path: String, source: std::io::Error },
    /// The file is not valid JSON or is missing required keys.
    Parse { path: String, detail: String },
    /// The document parsed but carries an invalid value.
    Invalid { detail: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => write!(f, "config io error: {path}: {source}"),
            ConfigError::Parse { path, detail } => {
                write!(f, "config parse error: {path}: {detail}")
            }
            ConfigError::Invalid { detail } => write!(f, "invalid config: {detail}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Engine config
// ---------------------------------------------------------------------------

/// Whether a venue adapter simulates fills or talks to the real venue.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueMode {
    Paper,
    Live,
}

/// Maker/taker fee schedule for one venue, in basis points.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub maker_bps: f64,
    pub taker_bps: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            maker_bps: 5.0,
            taker_bps: 10.0,
        }
    }
}

/// One configured venue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VenueConfig {
    pub name: String,
    /// `"spot"` or `"deriv"` — used by the basis strategy-position view.
    pub venue_type: String,
    pub mode: VenueMode,
    #[serde(default)]
    pub fees: FeeSchedule,
    #[serde(default)]
    pub supported_instruments: Vec<String>,
    /// Env var names carrying credentials for live mode. Never the secrets
    /// themselves.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_secret_env: Option<String>,
}

fn default_stale_threshold_secs() -> i64 {
    30
}

fn default_min_edge_buffer_bps() -> f64 {
    10.0
}

fn default_recon_interval_secs() -> u64 {
    60
}

fn default_hedge_ratio_band() -> (f64, f64) {
    (0.98, 1.02)
}

/// Top-level engine configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub tenant_id: String,
    pub venues: Vec<VenueConfig>,
    #[serde(default = "default_stale_threshold_secs")]
    pub stale_threshold_secs: i64,
    #[serde(default = "default_min_edge_buffer_bps")]
    pub min_edge_buffer_bps: f64,
    #[serde(default = "default_recon_interval_secs")]
    pub recon_interval_secs: u64,
    /// Basis hedge-ratio tolerance band checked by reconciliation.
    #[serde(default = "default_hedge_ratio_band")]
    pub hedge_ratio_band: (f64, f64),
    /// Total capital the allocator distributes across strategies.
    pub total_capital_usd: f64,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let cfg: EngineConfig = load_json(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tenant_id.is_empty() {
            return Err(ConfigError::Invalid {
                detail: "tenant_id must not be empty".into(),
            });
        }
        if self.venues.is_empty() {
            return Err(ConfigError::Invalid {
                detail: "at least one venue must be configured".into(),
            });
        }
        if self.total_capital_usd <= 0.0 {
            return Err(ConfigError::Invalid {
                detail: format!("total_capital_usd must be > 0, got {}", self.total_capital_usd),
            });
        }
        let (lo, hi) = self.hedge_ratio_band;
        if !(lo < hi && lo > 0.0) {
            return Err(ConfigError::Invalid {
                detail: format!("hedge_ratio_band must satisfy 0 < lo < hi, got ({lo}, {hi})"),
            });
        }
        for v in &self.venues {
            if v.mode == VenueMode::Live && (v.api_key_env.is_none() || v.api_secret_env.is_none())
            {
                return Err(ConfigError::Invalid {
                    detail: format!("venue {} is live but has no credential env vars", v.name),
                });
            }
        }
        Ok(())
    }

    pub fn venue(&self, name: &str) -> Option<&VenueConfig> {
        self.venues
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(name))
    }
}

// ---------------------------------------------------------------------------
// Allocator config
// ---------------------------------------------------------------------------

/// Capital-allocator tuning document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Base weight per strategy type, e.g. `{"spot": 0.3, "basis": 0.2}`.
    pub base_weights: BTreeMap<String, f64>,
    pub max_strategy_weight: f64,
    pub min_strategy_weight: f64,
    /// Max drawdown above which the performance multiplier throttles (0.6x).
    pub drawdown_throttle: f64,
    /// Sharpe below which the performance multiplier throttles (0.7x).
    pub sharpe_floor: f64,
    pub cooldown_minutes: i64,
    /// Scalar per regime risk bias, e.g. `{"risk_on": 1.1, "risk_off": 0.7}`.
    pub risk_bias_scalars: BTreeMap<String, f64>,
}

impl AllocatorConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let cfg: AllocatorConfig = load_json(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_weights.is_empty() {
            return Err(ConfigError::Invalid {
                detail: "base_weights must not be empty".into(),
            });
        }
        if !(0.0 < self.min_strategy_weight && self.min_strategy_weight <= self.max_strategy_weight)
        {
            return Err(ConfigError::Invalid {
                detail: format!(
                    "strategy weight bounds invalid: min={} max={}",
                    self.min_strategy_weight, self.max_strategy_weight
                ),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Read and parse one JSON config document.
pub fn load_json<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        detail: e.to_string(),
    })
}

/// Derive a stable UUID from a strategy name. Deterministic across restarts:
/// the first 16 bytes of SHA-256("cxd-strategy:" + name), with the UUID
/// version/variant bits normalised.
pub fn derive_strategy_id(name: &str) -> Uuid {
    let mut hasher = Sha256::new();
    hasher.update(b"cxd-strategy:");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    // Version 4 layout so derived ids are indistinguishable from random ones.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}

/// Canonical SHA-256 hash of a JSON value with recursively sorted keys.
/// Used to fingerprint configs in audit records.
pub fn config_hash(value: &serde_json::Value) -> String {
    fn sort_keys(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Object(map) => {
                let mut keys: Vec<_> = map.keys().cloned().collect();
                keys.sort();
                let mut new = serde_json::Map::new();
                for k in keys {
                    new.insert(k.clone(), sort_keys(&map[&k]));
                }
                serde_json::Value::Object(new)
            }
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(sort_keys).collect())
            }
            _ => v.clone(),
        }
    }

    let canonical = serde_json::to_string(&sort_keys(value)).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn derive_strategy_id_is_stable() {
        let a = derive_strategy_id("btc-trend");
        let b = derive_strategy_id("btc-trend");
        let c = derive_strategy_id("eth-trend");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.get_version_num(), 4);
    }

    #[test]
    fn config_hash_ignores_key_order() {
        let a: serde_json::Value = serde_json::json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b: serde_json::Value = serde_json::json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn engine_config_rejects_missing_tenant() {
        let cfg = EngineConfig {
            tenant_id: String::new(),
            venues: vec![VenueConfig {
                name: "coinbase".into(),
                venue_type: "spot".into(),
                mode: VenueMode::Paper,
                fees: FeeSchedule::default(),
                supported_instruments: vec![],
                api_key_env: None,
                api_secret_env: None,
            }],
            stale_threshold_secs: 30,
            min_edge_buffer_bps: 10.0,
            recon_interval_secs: 60,
            hedge_ratio_band: (0.98, 1.02),
            total_capital_usd: 100_000.0,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn engine_config_rejects_live_without_credentials() {
        let cfg = EngineConfig {
            tenant_id: "desk-1".into(),
            venues: vec![VenueConfig {
                name: "coinbase".into(),
                venue_type: "spot".into(),
                mode: VenueMode::Live,
                fees: FeeSchedule::default(),
                supported_instruments: vec![],
                api_key_env: None,
                api_secret_env: None,
            }],
            stale_threshold_secs: 30,
            min_edge_buffer_bps: 10.0,
            recon_interval_secs: 60,
            hedge_ratio_band: (0.98, 1.02),
            total_capital_usd: 100_000.0,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_json_reports_missing_required_keys() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, "{{\"tenant_id\": \"t\"}}").unwrap();
        let err = EngineConfig::load(f.path()).unwrap_err();
        match err {
            ConfigError::Parse { .. } => {}
            other => panic!("expected parse error, got {other}"),
        }
    }
}
