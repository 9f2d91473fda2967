//! Capital allocator: periodic recomputation of per-strategy weights from
//! regime, performance and risk, plus intent rescaling.
//!
//! Refuses to run on degraded data (any configured venue stale, or the
//! `recon_mismatch` circuit breaker active — reconciliation trips that
//! breaker at three consecutive mismatches). A refused run leaves the
//! previous decision in place.

pub mod regime;

pub use regime::{RegimeDetector, RegimeState};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use cxd_config::AllocatorConfig;
use cxd_domain::{AuditRecord, MetaEntry, TradeIntent};
use cxd_marketdata::MarketDataService;
use cxd_risk::CircuitBreakers;
use cxd_store::{
    AllocationRow, AllocatorDecisionRow, PerformanceRow, RiskMetricsRow, Store, StoreResult,
    StrategyRow,
};

/// One strategy's computed allocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    pub strategy_id: Uuid,
    pub allocation_pct: f64,
    pub allocated_capital: f64,
    pub risk_multiplier: f64,
    pub leverage_cap: f64,
    pub enabled: bool,
    pub rationale: serde_json::Value,
}

/// The allocator service.
pub struct CapitalAllocator {
    store: Arc<dyn Store>,
    marketdata: MarketDataService,
    breakers: Arc<CircuitBreakers>,
    config: AllocatorConfig,
    tenant_id: String,
    /// Venues whose staleness gates allocation runs.
    watched_venues: Vec<String>,
}

impl CapitalAllocator {
    pub fn new(
        store: Arc<dyn Store>,
        marketdata: MarketDataService,
        breakers: Arc<CircuitBreakers>,
        config: AllocatorConfig,
        tenant_id: impl Into<String>,
        watched_venues: Vec<String>,
    ) -> Self {
        Self {
            store,
            marketdata,
            breakers,
            config,
            tenant_id: tenant_id.into(),
            watched_venues,
        }
    }

    /// One allocation cycle. Returns the decisions, or an empty vector when
    /// the run was refused or there is nothing to allocate.
    pub async fn run_allocation(
        &self,
        regime: &RegimeState,
        total_capital: f64,
    ) -> StoreResult<Vec<AllocationResult>> {
        if !self.data_quality_ok().await {
            warn!("allocator_data_quality_degraded");
            return Ok(Vec::new());
        }

        let strategies = self.store.list_strategies(&self.tenant_id).await?;
        if strategies.is_empty() {
            return Ok(Vec::new());
        }
        let performance = self.store.latest_performance(&self.tenant_id).await?;
        let risk = self.store.latest_risk_metrics(&self.tenant_id).await?;

        let allocations = compute_allocations(
            &strategies,
            &performance,
            &risk,
            regime,
            total_capital,
            &self.config,
        );

        self.persist(&allocations, regime).await?;
        Ok(allocations)
    }

    /// Scale intents by the stored allocation decision. Intents with no
    /// allocation, a disabled strategy, or a scaled notional below the
    /// strategy's minimum are dropped. Originals are not mutated — the
    /// returned intents carry the allocation stamp.
    pub async fn apply_allocations(
        &self,
        intents: Vec<TradeIntent>,
    ) -> StoreResult<Vec<TradeIntent>> {
        if intents.is_empty() {
            return Ok(intents);
        }

        let rows = self.store.allocation_map(&self.tenant_id).await?;
        if rows.is_empty() {
            return Ok(intents);
        }
        let allocations: BTreeMap<Uuid, &AllocationRow> =
            rows.iter().map(|r| (r.strategy_id, r)).collect();
        let strategies: BTreeMap<Uuid, StrategyRow> = self
            .store
            .list_strategies(&self.tenant_id)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();
        let decision_id = self
            .store
            .latest_allocator_decision(&self.tenant_id)
            .await?
            .map(|d| d.decision_id)
            .unwrap_or_else(Uuid::new_v4);

        let mut adjusted = Vec::new();
        for intent in intents {
            let Some(allocation) = allocations.get(&intent.strategy_id) else {
                continue;
            };
            if allocation.allocation_pct <= 0.0 {
                continue;
            }
            if let Some(strategy) = strategies.get(&intent.strategy_id) {
                if !strategy.enabled {
                    continue;
                }
            }

            let mut max_notional = allocation.allocated_capital;
            if let Some(strategy) = strategies.get(&intent.strategy_id) {
                if strategy.max_notional > 0.0 {
                    max_notional = max_notional.min(strategy.max_notional);
                }
                if strategy.min_notional > 0.0 && max_notional < strategy.min_notional {
                    continue;
                }
            }

            let original = intent.target_exposure_usd;
            let scaled = original.min(max_notional) * allocation.risk_multiplier;
            let mut next = intent.clone();
            next.target_exposure_usd = scaled;
            if original > 0.0 {
                next.max_loss_usd = intent.max_loss_usd * (scaled / original);
            }
            next.meta.push(MetaEntry::Allocation {
                allocation_pct: allocation.allocation_pct,
                risk_multiplier: allocation.risk_multiplier,
                decision_id,
            });
            adjusted.push(next);
        }
        Ok(adjusted)
    }

    /// Degraded when any watched venue is stale or reconciliation has
    /// tripped its breaker.
    async fn data_quality_ok(&self) -> bool {
        if self.breakers.is_active("recon_mismatch") {
            return false;
        }
        !self.marketdata.any_stale(&self.watched_venues).await
    }

    async fn persist(
        &self,
        allocations: &[AllocationResult],
        regime: &RegimeState,
    ) -> StoreResult<()> {
        let decision_id = Uuid::new_v4();
        let now = Utc::now();
        let mut snapshot = Vec::new();

        for allocation in allocations {
            self.store
                .upsert_allocation(&AllocationRow {
                    tenant_id: self.tenant_id.clone(),
                    strategy_id: allocation.strategy_id,
                    allocated_capital: allocation.allocated_capital,
                    allocation_pct: allocation.allocation_pct,
                    leverage_cap: allocation.leverage_cap,
                    risk_multiplier: allocation.risk_multiplier,
                    updated_at: now,
                })
                .await?;
            self.store
                .set_strategy_enabled(allocation.strategy_id, allocation.enabled)
                .await?;
            snapshot.push(serde_json::json!({
                "strategy_id": allocation.strategy_id,
                "allocation_pct": allocation.allocation_pct,
                "allocated_capital": allocation.allocated_capital,
                "risk_multiplier": allocation.risk_multiplier,
            }));
        }

        self.store
            .record_allocator_decision(&AllocatorDecisionRow {
                tenant_id: self.tenant_id.clone(),
                decision_id,
                regime_state: serde_json::to_value(regime)?,
                allocation_snapshot: serde_json::Value::Array(snapshot.clone()),
                rationale: serde_json::Value::Array(
                    allocations.iter().map(|a| a.rationale.clone()).collect(),
                ),
                ts: now,
            })
            .await?;

        self.store
            .audit_log(
                &AuditRecord::new("allocator_decision", "allocator", decision_id.to_string())
                    .with_after(serde_json::json!({ "allocations": snapshot })),
            )
            .await?;
        info!(decision_id = %decision_id, count = allocations.len(), "allocator_decision_stored");
        Ok(())
    }
}

/// Pure scoring pipeline:
/// `score = base * perf_mul * regime_mul * bias_mul * cluster_mul`, then
/// simplex-normalise, clamp into `[min, max]`, and zero anything below the
/// minimum weight.
pub fn compute_allocations(
    strategies: &[StrategyRow],
    performance: &[PerformanceRow],
    risk: &[RiskMetricsRow],
    regime: &RegimeState,
    total_capital: f64,
    config: &AllocatorConfig,
) -> Vec<AllocationResult> {
    let perf_by_id: BTreeMap<Uuid, &PerformanceRow> =
        performance.iter().map(|r| (r.strategy_id, r)).collect();
    let risk_by_id: BTreeMap<Uuid, &RiskMetricsRow> =
        risk.iter().map(|r| (r.strategy_id, r)).collect();

    let mut scores: BTreeMap<Uuid, f64> = BTreeMap::new();
    let mut rationales: BTreeMap<Uuid, serde_json::Value> = BTreeMap::new();

    for strategy in strategies {
        let base = config
            .base_weights
            .get(&strategy.strategy_type)
            .copied()
            .unwrap_or(0.1);

        let mut perf_mul = 1.0;
        if let Some(perf) = perf_by_id.get(&strategy.id) {
            if perf.sharpe < config.sharpe_floor {
                perf_mul *= 0.7;
            }
            if perf.max_drawdown > config.drawdown_throttle {
                perf_mul *= 0.6;
            }
        }

        let regime_mul = regime_multiplier(regime, &strategy.strategy_type);
        let bias_mul = config
            .risk_bias_scalars
            .get(&regime.risk_bias)
            .copied()
            .unwrap_or(1.0);

        let cluster = risk_by_id
            .get(&strategy.id)
            .and_then(|r| r.correlation_cluster.clone());
        let cluster_mul = if cluster.is_some() { 0.95 } else { 1.0 };

        let score = base * perf_mul * regime_mul * bias_mul * cluster_mul;
        scores.insert(strategy.id, score);
        rationales.insert(
            strategy.id,
            serde_json::json!({
                "base_weight": base,
                "perf_multiplier": perf_mul,
                "regime_multiplier": regime_mul,
                "risk_bias": regime.risk_bias,
                "cluster": cluster,
            }),
        );
    }

    let total_score: f64 = scores.values().sum();
    let total_score = if total_score > 0.0 { total_score } else { 1.0 };

    strategies
        .iter()
        .map(|strategy| {
            let raw = scores[&strategy.id] / total_score;
            let mut weight = raw.clamp(0.0, config.max_strategy_weight);
            if weight < config.min_strategy_weight {
                weight = 0.0;
            }
            AllocationResult {
                strategy_id: strategy.id,
                allocation_pct: weight,
                allocated_capital: total_capital * weight,
                risk_multiplier: if weight > 0.0 { 1.0 } else { 0.0 },
                leverage_cap: 1.0,
                enabled: weight > 0.0,
                rationale: rationales[&strategy.id].clone(),
            }
        })
        .collect()
}

/// Regime multiplier table, keyed on (volatility, direction, strategy type).
fn regime_multiplier(regime: &RegimeState, strategy_type: &str) -> f64 {
    let mut mult = 1.0;
    if regime.volatility == "high_vol" {
        match strategy_type {
            "basis" | "arbitrage" => mult *= 1.2,
            "spot" | "futures" => mult *= 0.6,
            _ => {}
        }
    }
    if regime.direction == "range_bound" && strategy_type == "futures" {
        mult *= 1.1;
    }
    if matches!(regime.direction.as_str(), "trending_up" | "trending_down")
        && strategy_type == "spot"
    {
        mult *= 1.1;
    }
    mult
}
