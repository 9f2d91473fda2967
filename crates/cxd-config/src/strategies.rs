//! Strategy configuration document: `{scanner: {...}, strategies: [...]}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{derive_strategy_id, load_json, ConfigError};

/// Strategy family, steering which scan path produces opportunities.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyType {
    Spot,
    Futures,
    Arbitrage,
    Execution,
}

impl StrategyType {
    pub fn as_str(self) -> &'static str {
        match self {
            StrategyType::Spot => "spot",
            StrategyType::Futures => "futures",
            StrategyType::Arbitrage => "arbitrage",
            StrategyType::Execution => "execution",
        }
    }
}

/// The three scan timeframes, fast to slow (e.g. `"5m"`, `"1h"`, `"4h"`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyTimeframes {
    pub fast: String,
    pub medium: String,
    pub slow: String,
}

fn default_min_confidence() -> f64 {
    0.6
}

fn default_max_risk_per_trade() -> f64 {
    0.01
}

fn default_expected_holding_minutes() -> i64 {
    60
}

fn default_enabled() -> bool {
    true
}

/// One strategy definition as loaded from config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyDefinition {
    /// Stable id; derived from the name when omitted in the document.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    #[serde(rename = "type")]
    pub strategy_type: StrategyType,
    /// Instruments to scan. Basis pairs use `"SPOT|PERP"` notation.
    #[serde(default)]
    pub universe: Vec<String>,
    #[serde(default)]
    pub timeframes: Option<StrategyTimeframes>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_max_risk_per_trade")]
    pub max_risk_per_trade: f64,
    #[serde(default = "default_expected_holding_minutes")]
    pub expected_holding_minutes: i64,
    /// Venues this strategy may route to, in preference order.
    #[serde(default)]
    pub venue_routing: Vec<String>,
    #[serde(default)]
    pub book_type: Option<String>,
    #[serde(default)]
    pub book_id: Option<Uuid>,
    #[serde(default)]
    pub min_edge_bps: Option<f64>,
    /// Strategy-specific parameters passed through to the strategy impl.
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl StrategyDefinition {
    /// The effective id: explicit when present, derived from the name
    /// otherwise. Stable across restarts either way.
    pub fn effective_id(&self) -> Uuid {
        self.id.unwrap_or_else(|| derive_strategy_id(&self.name))
    }
}

fn default_top_k() -> usize {
    5
}

fn default_max_opportunities() -> usize {
    50
}

/// Scanner-wide limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_opportunities")]
    pub max_opportunities: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_opportunities: default_max_opportunities(),
        }
    }
}

/// The full strategies document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfigDoc {
    #[serde(default)]
    pub scanner: ScannerConfig,
    pub strategies: Vec<StrategyDefinition>,
}

impl StrategyConfigDoc {
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let doc: StrategyConfigDoc = load_json(path)?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for s in &self.strategies {
            if s.name.is_empty() {
                return Err(ConfigError::Invalid {
                    detail: "strategy name must not be empty".into(),
                });
            }
            if !(0.0..=1.0).contains(&s.min_confidence) {
                return Err(ConfigError::Invalid {
                    detail: format!(
                        "strategy {}: min_confidence must be in [0, 1], got {}",
                        s.name, s.min_confidence
                    ),
                });
            }
            if s.max_risk_per_trade <= 0.0 || s.max_risk_per_trade > 1.0 {
                return Err(ConfigError::Invalid {
                    detail: format!(
                        "strategy {}: max_risk_per_trade must be in (0, 1], got {}",
                        s.name, s.max_risk_per_trade
                    ),
                });
            }
            // Directional strategies need all three timeframes to stack.
            if matches!(s.strategy_type, StrategyType::Spot | StrategyType::Futures)
                && s.timeframes.is_none()
            {
                return Err(ConfigError::Invalid {
                    detail: format!("strategy {}: directional strategies require timeframes", s.name),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_json() -> &'static str {
        r#"{
            "scanner": {"top_k": 3, "max_opportunities": 20},
            "strategies": [
                {
                    "name": "btc-trend",
                    "type": "spot",
                    "universe": ["BTC-USD"],
                    "timeframes": {"fast": "5m", "medium": "1h", "slow": "4h"},
                    "min_confidence": 0.6,
                    "max_risk_per_trade": 0.01,
                    "venue_routing": ["coinbase"]
                },
                {
                    "name": "cb-kr-arb",
                    "type": "arbitrage",
                    "universe": ["BTC-USD"],
                    "venue_routing": ["coinbase", "kraken"],
                    "min_edge_bps": 5.0
                }
            ]
        }"#
    }

    #[test]
    fn parses_full_document() {
        let doc: StrategyConfigDoc = serde_json::from_str(doc_json()).unwrap();
        doc.validate().unwrap();
        assert_eq!(doc.scanner.top_k, 3);
        assert_eq!(doc.strategies.len(), 2);
        assert_eq!(doc.strategies[0].strategy_type, StrategyType::Spot);
        assert!(doc.strategies[1].timeframes.is_none());
    }

    #[test]
    fn missing_id_derives_stable_uuid() {
        let doc: StrategyConfigDoc = serde_json::from_str(doc_json()).unwrap();
        let id1 = doc.strategies[0].effective_id();
        let doc2: StrategyConfigDoc = serde_json::from_str(doc_json()).unwrap();
        assert_eq!(id1, doc2.strategies[0].effective_id());
    }

    #[test]
    fn directional_without_timeframes_is_fatal() {
        let doc = StrategyConfigDoc {
            scanner: ScannerConfig::default(),
            strategies: vec![StrategyDefinition {
                id: None,
                name: "bad".into(),
                strategy_type: StrategyType::Spot,
                universe: vec!["BTC-USD".into()],
                timeframes: None,
                min_confidence: 0.5,
                max_risk_per_trade: 0.01,
                expected_holding_minutes: 60,
                venue_routing: vec![],
                book_type: None,
                book_id: None,
                min_edge_bps: None,
                parameters: serde_json::Value::Null,
                enabled: true,
            }],
        };
        assert!(doc.validate().is_err());
    }
}
