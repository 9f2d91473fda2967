//! Edge/cost model: estimate all-in execution cost in basis points and
//! compare it against the intent's expected edge plus a buffer.
//!
//! Pure and synchronous — the OMS supplies the snapshot, fee table and
//! measured latency; this crate only does arithmetic and returns the full
//! breakdown so the decision can be audit-logged.

use serde::{Deserialize, Serialize};

use cxd_domain::{DataQuality, MarketSnapshot, OrderStyle, TradeIntent};

/// Default buffer required above total costs, in basis points.
pub const DEFAULT_MIN_EDGE_BUFFER_BPS: f64 = 10.0;

// Fallbacks when the snapshot lacks the field.
const DEFAULT_SPREAD_BPS: f64 = 5.0;
const DEFAULT_VOLATILITY_BPS: f64 = 15.0;
const DEFAULT_VOLUME_USD: f64 = 1_000_000.0;
const DEFAULT_MAKER_FEE_BPS: f64 = 5.0;
const DEFAULT_TAKER_FEE_BPS: f64 = 10.0;

/// Venue fee table in basis points.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VenueFees {
    pub maker_bps: f64,
    pub taker_bps: f64,
}

impl Default for VenueFees {
    fn default() -> Self {
        Self {
            maker_bps: DEFAULT_MAKER_FEE_BPS,
            taker_bps: DEFAULT_TAKER_FEE_BPS,
        }
    }
}

/// Per-term cost breakdown, in basis points. Serialised into the audit log
/// on both approvals and rejections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeCostBreakdown {
    pub fee_bps: f64,
    pub spread_bps: f64,
    pub slippage_bps: f64,
    pub latency_bps: f64,
    pub funding_bps: f64,
    pub basis_bps: f64,
    pub total_cost_bps: f64,
}

/// The gate decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeCostResult {
    pub allowed: bool,
    pub reason: String,
    pub expected_edge_bps: f64,
    pub min_edge_bps: f64,
    pub breakdown: EdgeCostBreakdown,
}

/// Edge/cost evaluator. Stateless apart from the configured buffer.
#[derive(Clone, Debug)]
pub struct EdgeCostModel {
    min_edge_buffer_bps: f64,
}

impl Default for EdgeCostModel {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_EDGE_BUFFER_BPS)
    }
}

impl EdgeCostModel {
    pub fn new(min_edge_buffer_bps: f64) -> Self {
        Self { min_edge_buffer_bps }
    }

    /// Evaluate one intent against one market snapshot.
    ///
    /// A snapshot tagged `unavailable` rejects immediately — the gate never
    /// prices against data it does not have.
    pub fn evaluate_intent(
        &self,
        intent: &TradeIntent,
        snapshot: Option<&MarketSnapshot>,
        fees: VenueFees,
        latency_ms: Option<i64>,
    ) -> EdgeCostResult {
        if let Some(s) = snapshot {
            if s.data_quality == DataQuality::Unavailable {
                return EdgeCostResult {
                    allowed: false,
                    reason: "market data unavailable".to_string(),
                    expected_edge_bps: 0.0,
                    min_edge_bps: 0.0,
                    breakdown: EdgeCostBreakdown {
                        fee_bps: 0.0,
                        spread_bps: 0.0,
                        slippage_bps: 0.0,
                        latency_bps: 0.0,
                        funding_bps: 0.0,
                        basis_bps: 0.0,
                        total_cost_bps: 0.0,
                    },
                };
            }
        }

        let expected_edge_bps = intent
            .meta
            .expected_edge_bps()
            .unwrap_or(intent.confidence * 100.0);

        let spread_bps = snapshot.map(|s| s.spread_bps).unwrap_or(DEFAULT_SPREAD_BPS);
        let volatility_bps = snapshot
            .and_then(|s| s.volatility_bps)
            .unwrap_or(DEFAULT_VOLATILITY_BPS);
        let volume_usd = snapshot
            .and_then(|s| s.volume_24h)
            .unwrap_or(DEFAULT_VOLUME_USD);

        let fee_bps = intent.meta.fee_bps().unwrap_or(match intent.meta.order_style() {
            Some(OrderStyle::Maker) => fees.maker_bps,
            _ => fees.taker_bps,
        });

        let slippage_bps = estimate_slippage_bps(
            spread_bps,
            volatility_bps,
            intent.target_exposure_usd,
            volume_usd,
        );
        let latency_bps = latency_penalty_bps(latency_ms.unwrap_or(0));
        let funding_bps = intent.meta.funding_rate_bps();
        let basis_bps = intent.meta.basis_risk_bps();

        let total_cost_bps =
            fee_bps + spread_bps + slippage_bps + latency_bps + funding_bps + basis_bps;
        let min_edge_bps = total_cost_bps + self.min_edge_buffer_bps;

        let allowed = expected_edge_bps >= min_edge_bps;
        let reason = if allowed {
            "ok".to_string()
        } else {
            format!(
                "expected edge ({expected_edge_bps:.1} bps) < required minimum ({min_edge_bps:.1} bps)"
            )
        };

        EdgeCostResult {
            allowed,
            reason,
            expected_edge_bps,
            min_edge_bps,
            breakdown: EdgeCostBreakdown {
                fee_bps,
                spread_bps,
                slippage_bps,
                latency_bps,
                funding_bps,
                basis_bps,
                total_cost_bps,
            },
        }
    }
}

/// Slippage model: half the spread, a quarter of short-horizon volatility,
/// plus size impact capped at 30 bps; the sum capped at 50 bps.
fn estimate_slippage_bps(
    spread_bps: f64,
    volatility_bps: f64,
    size_usd: f64,
    volume_usd: f64,
) -> f64 {
    if volume_usd <= 0.0 {
        return (spread_bps + volatility_bps).min(30.0);
    }
    let impact_bps = (size_usd / volume_usd * 10_000.0).min(30.0);
    (spread_bps * 0.5 + volatility_bps * 0.25 + impact_bps).min(50.0)
}

/// Latency penalty: free up to 200 ms, then 1 bps per 100 ms, capped at 10.
fn latency_penalty_bps(latency_ms: i64) -> f64 {
    if latency_ms <= 200 {
        return 0.0;
    }
    (((latency_ms - 200) as f64) / 100.0).min(10.0)
}
