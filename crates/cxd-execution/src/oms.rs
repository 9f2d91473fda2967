//! The OMS: single writer of orders and fills.
//!
//! Converts approved intents to orders, routes them through venue adapters,
//! validates fills, and keeps book exposure and the position table in sync.
//! No other component persists orders.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use cxd_domain::{
    Alert, AuditRecord, ExecutionPlan, IntentMeta, MetaEntry, Order, OrderStatus, OrderType,
    Severity, Side, TradeIntent,
};
use cxd_edge::{EdgeCostModel, VenueFees};
use cxd_marketdata::MarketDataService;
use cxd_portfolio::{is_reducing, size_position, round_down_to_tick, PortfolioEngine};
use cxd_risk::{RiskContext, RiskEngine};
use cxd_store::{MultiLegIntentRow, Store};
use cxd_venues::VenueRegistry;

use crate::planner::ExecutionPlanner;
use crate::state_machine::{transition_action, validate_transition};

/// OMS tuning.
#[derive(Clone, Debug)]
pub struct OmsConfig {
    pub tenant_id: String,
    /// Venue size tick; sized positions are floored to it.
    pub tick: f64,
    /// Fee tables keyed by lower-case venue name.
    pub venue_fees: BTreeMap<String, VenueFees>,
    pub default_max_risk_per_trade: f64,
}

impl Default for OmsConfig {
    fn default() -> Self {
        Self {
            tenant_id: "default".to_string(),
            tick: cxd_portfolio::DEFAULT_TICK,
            venue_fees: BTreeMap::new(),
            default_max_risk_per_trade: 0.01,
        }
    }
}

/// Order-lifecycle writer and gate orchestrator.
pub struct Oms {
    store: Arc<dyn Store>,
    registry: VenueRegistry,
    marketdata: MarketDataService,
    risk: RiskEngine,
    portfolio: PortfolioEngine,
    edge: EdgeCostModel,
    planner: ExecutionPlanner,
    config: OmsConfig,
    /// Per-strategy `max_risk_per_trade`, populated from the registry by the
    /// supervisor.
    risk_limits: RwLock<BTreeMap<Uuid, f64>>,
}

impl Oms {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        registry: VenueRegistry,
        marketdata: MarketDataService,
        risk: RiskEngine,
        portfolio: PortfolioEngine,
        edge: EdgeCostModel,
        config: OmsConfig,
    ) -> Self {
        let planner = ExecutionPlanner::new(Arc::clone(&store), config.tenant_id.clone());
        Self {
            store,
            registry,
            marketdata,
            risk,
            portfolio,
            edge,
            planner,
            config,
            risk_limits: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn set_strategy_risk_limit(&self, strategy_id: Uuid, max_risk_per_trade: f64) {
        self.risk_limits
            .write()
            .unwrap()
            .insert(strategy_id, max_risk_per_trade);
    }

    fn risk_limit_for(&self, strategy_id: Uuid) -> f64 {
        self.risk_limits
            .read()
            .unwrap()
            .get(&strategy_id)
            .copied()
            .unwrap_or(self.config.default_max_risk_per_trade)
    }

    /// Execute a trade intent through the full gate pipeline.
    ///
    /// Returns `None` when any gate blocks the intent (the rejection is
    /// audit-logged), `Some(order)` for the final executed (or rejected)
    /// order otherwise.
    pub async fn execute_intent(
        &self,
        intent: &TradeIntent,
        venue_name: &str,
    ) -> Result<Option<Order>> {
        // Gate 1: kill switch.
        if let Some(reason) = self.store.kill_switch(Some(intent.book_id)).await? {
            warn!(intent_id = %intent.id, reason = %reason, "trade_blocked_kill_switch");
            self.audit_blocked(intent, "kill_switch", &reason, serde_json::json!({}))
                .await;
            return Ok(None);
        }

        // Gate 2: book status.
        let Some(book) = self.store.fetch_book(intent.book_id).await? else {
            error!(book_id = %intent.book_id, "book_not_found");
            return Ok(None);
        };
        let positions = self.store.open_positions_for_book(book.id).await?;
        match book.status {
            cxd_domain::BookStatus::Halted => {
                self.audit_blocked(intent, "book_status", "book halted", serde_json::json!({}))
                    .await;
                return Ok(None);
            }
            cxd_domain::BookStatus::ReduceOnly => {
                if !is_reducing(intent, &positions) {
                    warn!(book_id = %book.id, "reduce_only_not_reducing");
                    self.audit_blocked(
                        intent,
                        "book_status",
                        "reduce_only_mode",
                        serde_json::json!({}),
                    )
                    .await;
                    return Ok(None);
                }
            }
            cxd_domain::BookStatus::Active => {}
        }

        // Gates 3+4: venue health + risk chain.
        let venue = self.store.venue_by_name(venue_name).await?;
        let (cluster, cluster_exposures) = self.cluster_context(intent.strategy_id).await?;
        let ctx = RiskContext {
            book: book.clone(),
            venue: venue.clone(),
            positions: positions.clone(),
            max_risk_per_trade: self.risk_limit_for(intent.strategy_id),
            cluster,
            cluster_exposures,
        };
        let risk_result = self.risk.check_intent(intent, &ctx).await?;
        if !risk_result.is_approved() {
            warn!(intent_id = %intent.id, reasons = ?risk_result.reasons, "intent_rejected");
            self.store
                .audit_log(
                    &AuditRecord::new("intent_rejected", "trade_intent", intent.id.to_string())
                        .with_book(intent.book_id)
                        .with_severity(Severity::Warning)
                        .with_after(serde_json::json!({
                            "reasons": risk_result.reasons,
                            "checks_failed": risk_result.checks_failed,
                        })),
                )
                .await?;
            return Ok(None);
        }

        // Gate 5: execution cost vs edge.
        let snapshot = self
            .marketdata
            .get_price(venue_name, &intent.instrument)
            .await;
        let fees = self
            .config
            .venue_fees
            .get(&venue_name.to_lowercase())
            .copied()
            .unwrap_or_default();
        let latency_ms = venue.as_ref().map(|v| v.latency_ms);
        let cost = self
            .edge
            .evaluate_intent(intent, snapshot.as_ref(), fees, latency_ms);
        if !cost.allowed {
            warn!(
                intent_id = %intent.id,
                reason = %cost.reason,
                expected_cost_bps = cost.breakdown.total_cost_bps,
                "intent_rejected_cost"
            );
            self.audit_blocked(
                intent,
                "execution_cost",
                &cost.reason,
                serde_json::json!({
                    "expected_cost_bps": cost.breakdown.total_cost_bps,
                    "min_edge_bps": cost.min_edge_bps,
                    "estimated_edge_bps": cost.expected_edge_bps,
                    "breakdown": cost.breakdown,
                }),
            )
            .await;
            return Ok(None);
        }
        self.store
            .audit_log(
                &AuditRecord::new("intent_approved", "trade_intent", intent.id.to_string())
                    .with_book(intent.book_id)
                    .with_after(serde_json::json!({
                        "expected_edge_bps": cost.expected_edge_bps,
                        "min_edge_bps": cost.min_edge_bps,
                        "breakdown": cost.breakdown,
                        "size_factor": risk_result.size_factor,
                    })),
            )
            .await?;

        // Sizing.
        let entry_price = snapshot
            .as_ref()
            .map(|s| if s.mid > 0.0 { s.mid } else { s.ask })
            .unwrap_or(0.0);
        let sized = size_position(intent, entry_price, self.config.tick);
        let position_size =
            round_down_to_tick(sized * risk_result.size_factor, self.config.tick);
        if position_size <= 0.0 {
            warn!(intent_id = %intent.id, entry_price, "zero_position_size");
            return Ok(None);
        }

        // Multi-leg path.
        if let Some(plan) = intent.meta.execution_plan() {
            return self
                .execute_multi_leg(intent, plan.clone(), position_size)
                .await;
        }

        // Single leg.
        self.execute_single_leg(intent, venue_name, venue.map(|v| v.id), position_size)
            .await
    }

    async fn execute_single_leg(
        &self,
        intent: &TradeIntent,
        venue_name: &str,
        venue_id: Option<Uuid>,
        position_size: f64,
    ) -> Result<Option<Order>> {
        let Some(adapter) = self.registry.get(venue_name) else {
            error!(venue = venue_name, "no_adapter_for_venue");
            return Ok(None);
        };

        let order = Order::new(
            intent.book_id,
            Some(intent.strategy_id),
            venue_id,
            intent.instrument.clone(),
            intent.direction,
            position_size,
            OrderType::Market,
            None,
        );

        let start = Instant::now();
        match adapter.place_order(order.clone()).await {
            Ok(mut executed) => {
                executed.latency_ms = Some(start.elapsed().as_millis() as i64);
                self.validate_and_book_fill(&mut executed).await?;
                self.store.upsert_order(&executed).await?;
                info!(
                    order_id = %executed.id,
                    status = %executed.status,
                    filled_price = ?executed.filled_price,
                    latency_ms = ?executed.latency_ms,
                    "order_executed"
                );
                Ok(Some(executed))
            }
            Err(e) => {
                error!(error = %e, intent_id = %intent.id, "order_execution_failed");
                let mut rejected = order;
                rejected.status = OrderStatus::Rejected;
                rejected.updated_at = Utc::now();
                self.store.upsert_order(&rejected).await?;
                self.store
                    .audit_log(
                        &AuditRecord::new("order_rejected", "order", rejected.id.to_string())
                            .with_book(rejected.book_id)
                            .with_severity(Severity::Warning)
                            .with_after(serde_json::json!({ "error": e.to_string() })),
                    )
                    .await?;
                Ok(Some(rejected))
            }
        }
    }

    async fn execute_multi_leg(
        &self,
        intent: &TradeIntent,
        mut plan: ExecutionPlan,
        position_size: f64,
    ) -> Result<Option<Order>> {
        for leg in &mut plan.legs {
            if leg.size <= 0.0 {
                leg.size = position_size;
            }
        }

        let mut legs_json = serde_json::to_value(&plan)?;
        if let Some(obj) = legs_json.as_object_mut() {
            obj.insert(
                "notional_usd".to_string(),
                serde_json::json!(intent.target_exposure_usd),
            );
        }
        self.store
            .insert_multi_leg_intent(&MultiLegIntentRow {
                tenant_id: self.config.tenant_id.clone(),
                intent_id: intent.id,
                legs_json,
                execution_mode: match plan.mode {
                    cxd_domain::ExecutionMode::Atomic => "atomic".to_string(),
                    cxd_domain::ExecutionMode::Legged => "legged".to_string(),
                },
                status: "open".to_string(),
            })
            .await?;

        let mut executed = self.planner.execute_plan(intent, &plan, &self.registry).await;

        // Fill validation and book/position updates are the OMS's job even
        // for planner-submitted legs.
        for order in executed.iter_mut() {
            self.validate_and_book_fill(order).await?;
            self.store.upsert_order(order).await?;
        }

        let status = if executed.is_empty() {
            if plan.unwind_on_fail {
                "unwound"
            } else {
                "failed"
            }
        } else if executed
            .iter()
            .all(|o| o.status == OrderStatus::Filled)
        {
            "filled"
        } else {
            "partial"
        };
        self.store.update_multi_leg_status(intent.id, status).await?;

        self.update_basis_strategy_positions(intent, &executed).await?;

        Ok(executed.into_iter().last())
    }

    /// Post-fill validation: a reported fill with a non-positive price is
    /// forced to `rejected`, the book is NOT touched, and a critical alert
    /// is raised. Valid fills apply their signed notional to the book and
    /// flow into the position table.
    async fn validate_and_book_fill(&self, order: &mut Order) -> Result<()> {
        if !matches!(order.status, OrderStatus::Filled | OrderStatus::Partial) {
            return Ok(());
        }

        if order.has_invalid_fill_price() {
            error!(
                order_id = %order.id,
                filled_price = ?order.filled_price,
                "invalid_fill_price"
            );
            order.status = OrderStatus::Rejected;
            order.slippage_bps = None;
            order.updated_at = Utc::now();
            self.store
                .create_alert(&Alert::new(
                    "Invalid Fill Price - Reconciliation Required",
                    format!(
                        "order {} returned invalid fill price: {:?}",
                        order.id, order.filled_price
                    ),
                    Severity::Critical,
                    "oms",
                ))
                .await?;
            self.store
                .audit_log(
                    &AuditRecord::new("order_rejected", "order", order.id.to_string())
                        .with_book(order.book_id)
                        .with_severity(Severity::Critical)
                        .with_after(serde_json::json!({ "reason": "fill_price_invalid" })),
                )
                .await?;
            return Ok(());
        }

        // Legal transition check: the adapter hands back open -> X.
        if let Err(e) = validate_transition(OrderStatus::Open, order.status) {
            error!(error = %e, order_id = %order.id, "illegal_order_transition");
            return Ok(());
        }

        let exposure_delta = order.signed_fill_notional();
        self.portfolio
            .update_book_exposure(order.book_id, exposure_delta)
            .await?;
        self.portfolio.apply_fill(order).await?;

        self.store
            .audit_log(
                &AuditRecord::new(transition_action(order.status), "order", order.id.to_string())
                    .with_book(order.book_id)
                    .with_after(serde_json::json!({
                        "filled_size": order.filled_size,
                        "filled_price": order.filled_price,
                        "exposure_delta": exposure_delta,
                    })),
            )
            .await?;
        Ok(())
    }

    /// Basis intents also maintain the `(spot, deriv, hedged_ratio)` view.
    async fn update_basis_strategy_positions(
        &self,
        intent: &TradeIntent,
        executed: &[Order],
    ) -> Result<()> {
        if intent.meta.strategy_type() != Some("basis") || executed.is_empty() {
            return Ok(());
        }

        for order in executed {
            if order.has_invalid_fill_price()
                || matches!(order.status, OrderStatus::Rejected | OrderStatus::Cancelled)
            {
                continue;
            }
            let Some(venue_id) = order.venue_id else { continue };
            let Some(venue) = self.store.fetch_venue(venue_id).await? else {
                continue;
            };
            let Some(instrument) = self
                .store
                .instrument_by_symbol(&self.config.tenant_id, &order.instrument)
                .await?
            else {
                continue;
            };

            let size = if order.filled_size > 0.0 {
                order.filled_size
            } else {
                order.size
            };
            let delta = order.side.sign() * size;
            let row = self
                .store
                .apply_strategy_position_delta(
                    &self.config.tenant_id,
                    intent.strategy_id,
                    instrument.id,
                    &venue.venue_type,
                    delta,
                )
                .await?;
            info!(
                strategy_id = %intent.strategy_id,
                hedged_ratio = row.hedged_ratio,
                "strategy_positions_updated"
            );
        }
        Ok(())
    }

    /// Direct order placement: builds a synthetic full-confidence intent and
    /// runs the complete pipeline — manual orders get no special treatment.
    #[allow(clippy::too_many_arguments)]
    pub async fn place_order(
        &self,
        book_id: Uuid,
        venue_name: &str,
        instrument: &str,
        side: Side,
        size: f64,
        price: Option<f64>,
        strategy_id: Option<Uuid>,
    ) -> Result<Option<Order>> {
        let notional = size * price.unwrap_or(1.0);
        let mut intent = TradeIntent::new(
            book_id,
            strategy_id.unwrap_or_else(Uuid::new_v4),
            instrument,
            side,
            notional,
            notional * 0.05,
            0,
            1.0,
        );
        intent.meta = IntentMeta::new().with(MetaEntry::Freeform(BTreeMap::from([(
            "origin".to_string(),
            serde_json::json!("manual"),
        )])));
        self.execute_intent(&intent, venue_name).await
    }

    /// Cancel an open order. Orders that never reached the venue are
    /// cancelled locally; otherwise the venue confirms first.
    pub async fn cancel_order(&self, order_id: Uuid, venue_name: &str) -> Result<bool> {
        let Some(mut order) = self.store.fetch_order(order_id).await? else {
            error!(order_id = %order_id, "order_not_found");
            return Ok(false);
        };

        if validate_transition(order.status, OrderStatus::Cancelled).is_err() {
            warn!(order_id = %order_id, status = %order.status, "cancel_on_terminal_order");
            return Ok(false);
        }

        let confirmed = match &order.venue_order_id {
            None => true,
            Some(venue_order_id) => {
                let Some(adapter) = self.registry.get(venue_name) else {
                    error!(venue = venue_name, "no_adapter_for_venue");
                    return Ok(false);
                };
                adapter.cancel_order(venue_order_id).await.unwrap_or(false)
            }
        };

        if confirmed {
            order.status = OrderStatus::Cancelled;
            order.updated_at = Utc::now();
            self.store.upsert_order(&order).await?;
            self.store
                .audit_log(
                    &AuditRecord::new("order_cancelled", "order", order.id.to_string())
                        .with_book(order.book_id),
                )
                .await?;
            info!(order_id = %order_id, "order_cancelled");
        }
        Ok(confirmed)
    }

    /// Flip a book to reduce-only. From here on only reducing intents pass
    /// the book gate.
    pub async fn set_reduce_only(&self, book_id: Uuid, reason: &str) -> Result<()> {
        let before = self.store.fetch_book(book_id).await?;
        self.store
            .update_book_status(book_id, cxd_domain::BookStatus::ReduceOnly)
            .await?;
        warn!(book_id = %book_id, reason, "book_reduce_only");

        self.store
            .create_alert(&Alert::new(
                "Book Set to Reduce-Only",
                format!("book {book_id} is now reduce-only: {reason}"),
                Severity::Warning,
                "oms",
            ))
            .await?;
        let mut record = AuditRecord::new("book_reduce_only", "book", book_id.to_string())
            .with_book(book_id)
            .with_severity(Severity::Warning)
            .with_after(serde_json::json!({ "status": "reduce_only", "reason": reason }));
        if let Some(b) = before {
            record = record.with_before(serde_json::json!({ "status": b.status.as_str() }));
        }
        self.store.audit_log(&record).await?;
        Ok(())
    }

    async fn cluster_context(
        &self,
        strategy_id: Uuid,
    ) -> Result<(Option<String>, BTreeMap<String, f64>)> {
        let rows = self
            .store
            .latest_risk_metrics(&self.config.tenant_id)
            .await?;
        let cluster = rows
            .iter()
            .find(|r| r.strategy_id == strategy_id)
            .and_then(|r| r.correlation_cluster.clone());
        let mut exposures: BTreeMap<String, f64> = BTreeMap::new();
        for r in &rows {
            if let Some(c) = &r.correlation_cluster {
                *exposures.entry(c.clone()).or_insert(0.0) += r.gross_exposure;
            }
        }
        Ok((cluster, exposures))
    }

    async fn audit_blocked(
        &self,
        intent: &TradeIntent,
        gate: &str,
        reason: &str,
        mut extra: serde_json::Value,
    ) {
        if let Some(obj) = extra.as_object_mut() {
            obj.insert("gate".to_string(), serde_json::json!(gate));
            obj.insert("reason".to_string(), serde_json::json!(reason));
        }
        let _ = self
            .store
            .audit_log(
                &AuditRecord::new("trade_blocked", "trade_intent", intent.id.to_string())
                    .with_book(intent.book_id)
                    .with_severity(Severity::Warning)
                    .with_after(extra),
            )
            .await;
    }
}
