//! Reconciliation: periodically compare internal orders, positions, basis
//! hedge ratios and spot inventory against venue truth.
//!
//! Auto-correction is deliberately limited to one safe case: the venue
//! reports an order filled/done while we still hold it open — the internal
//! row is promoted to `filled`. Everything else alerts and escalates.
//!
//! Escalation ladder (per-venue mismatch counter, reset on a clean run):
//! - 1: warning alert, audit only.
//! - 3: critical alert, `recon_mismatch` circuit breaker, affected books
//!   reduce-only.
//! - 5: kill switch on affected books.
//!
//! Runs are serialised per venue via a venue-scoped async lock.

pub mod status;

pub use status::{normalize_venue_status, status_matches};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use cxd_domain::{Alert, AuditRecord, Order, OrderStatus, Severity};
use cxd_execution::Oms;
use cxd_risk::RiskEngine;
use cxd_store::{Store, StoreResult};
use cxd_venues::{VenueOrderRow, VenueRegistry};

// ---------------------------------------------------------------------------
// Config and report types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
    /// Filled-size comparison tolerance, percent.
    pub size_tolerance_pct: f64,
    /// Filled-price comparison tolerance, percent.
    pub price_tolerance_pct: f64,
    /// Spot inventory drift threshold, percent.
    pub inventory_drift_pct: f64,
    /// Acceptable basis hedge ratio band.
    pub hedge_ratio_band: (f64, f64),
    /// Lookback for non-terminal internal orders.
    pub order_window_hours: i64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            size_tolerance_pct: 0.5,
            price_tolerance_pct: 0.1,
            inventory_drift_pct: 2.0,
            hedge_ratio_band: (0.98, 1.02),
            order_window_hours: 24,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderMismatch {
    pub order_id: Uuid,
    pub venue_order_id: Option<String>,
    pub field: String,
    pub internal: String,
    pub venue: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionMismatch {
    /// `missing_internal | missing_venue | size_mismatch`
    pub kind: String,
    pub instrument: String,
    pub internal_size: f64,
    pub venue_size: f64,
    pub diff_pct: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VenueReconReport {
    pub venue: String,
    /// `ok | mismatch | error`
    pub status: String,
    pub orders_checked: usize,
    pub order_mismatches: Vec<OrderMismatch>,
    pub positions_checked: usize,
    pub position_mismatches: Vec<PositionMismatch>,
    pub auto_corrected: usize,
    pub actions_taken: Vec<String>,
    pub mismatch_count: u32,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

struct VenueState {
    mismatch_count: u32,
    lock: Arc<Mutex<()>>,
}

pub struct ReconciliationService {
    store: Arc<dyn Store>,
    registry: VenueRegistry,
    risk: RiskEngine,
    oms: Arc<Oms>,
    config: ReconcileConfig,
    tenant_id: String,
    venues: Mutex<BTreeMap<String, VenueState>>,
}

impl ReconciliationService {
    pub fn new(
        store: Arc<dyn Store>,
        registry: VenueRegistry,
        risk: RiskEngine,
        oms: Arc<Oms>,
        config: ReconcileConfig,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            risk,
            oms,
            config,
            tenant_id: tenant_id.into(),
            venues: Mutex::new(BTreeMap::new()),
        }
    }

    /// Current mismatch counter for a venue (tests and status surfaces).
    pub async fn mismatch_count(&self, venue: &str) -> u32 {
        let g = self.venues.lock().await;
        g.get(&venue.to_lowercase())
            .map(|v| v.mismatch_count)
            .unwrap_or(0)
    }

    /// One full reconciliation cycle: every registered venue, then the
    /// tenant-wide basis hedge check. Failures are isolated per venue.
    pub async fn run_all(&self) -> BTreeMap<String, VenueReconReport> {
        let names = self.registry.names();
        let mut out = BTreeMap::new();
        for name in names {
            let report = match self.reconcile_venue(&name).await {
                Ok(r) => r,
                Err(e) => {
                    error!(venue = %name, error = %e, "recon_venue_failed");
                    VenueReconReport {
                        venue: name.clone(),
                        status: "error".to_string(),
                        orders_checked: 0,
                        order_mismatches: Vec::new(),
                        positions_checked: 0,
                        position_mismatches: Vec::new(),
                        auto_corrected: 0,
                        actions_taken: Vec::new(),
                        mismatch_count: self.mismatch_count(&name).await,
                    }
                }
            };
            out.insert(name, report);
        }

        // The hedge-ratio view is per strategy, not per venue: run it once
        // per cycle so alerts and reduce-only transitions fire once.
        if let Err(e) = self.check_basis_hedge_ratios().await {
            error!(error = %e, "basis_hedge_ratio_check_failed");
        }

        out
    }

    /// Reconcile one venue under its serialising lock.
    pub async fn reconcile_venue(&self, venue_name: &str) -> anyhow::Result<VenueReconReport> {
        let venue_key = venue_name.to_lowercase();
        let lock = {
            let mut g = self.venues.lock().await;
            let state = g.entry(venue_key.clone()).or_insert_with(|| VenueState {
                mismatch_count: 0,
                lock: Arc::new(Mutex::new(())),
            });
            Arc::clone(&state.lock)
        };
        let _guard = lock.lock().await;

        let adapter = self
            .registry
            .get(&venue_key)
            .ok_or_else(|| anyhow::anyhow!("no adapter registered for {venue_key}"))?;
        let venue_row = self
            .store
            .venue_by_name(&venue_key)
            .await?
            .ok_or_else(|| anyhow::anyhow!("venue {venue_key} not in store"))?;

        // 1. Orders.
        let since = Utc::now() - Duration::hours(self.config.order_window_hours);
        let internal_orders = self.store.open_orders_for_venue(venue_row.id, since).await?;
        let mut venue_orders = adapter.get_open_orders().await.unwrap_or_default();
        venue_orders.extend(adapter.get_recent_fills().await.unwrap_or_default());

        let mut order_mismatches = Vec::new();
        let mut auto_corrected = 0;
        for order in &internal_orders {
            let venue_order = find_venue_order(order, &venue_orders);
            let (mismatches, corrected) = self
                .reconcile_single_order(order, venue_order)
                .await?;
            if corrected {
                auto_corrected += 1;
            }
            order_mismatches.extend(mismatches);
        }

        // 2. Positions.
        let internal_positions = self.store.open_positions_for_venue(venue_row.id).await?;
        let venue_positions = adapter.get_positions().await.unwrap_or_default();
        let position_mismatches =
            self.compare_positions(&internal_positions, &venue_positions);

        // 3. Spot inventory drift.
        self.check_inventory_drift(&venue_key, venue_row.id, adapter.as_ref())
            .await?;

        // Escalation bookkeeping.
        let has_mismatch = !order_mismatches.is_empty() || !position_mismatches.is_empty();
        let mismatch_count = {
            let mut g = self.venues.lock().await;
            let state = g.get_mut(&venue_key).expect("state inserted above");
            if has_mismatch {
                state.mismatch_count += 1;
            } else {
                state.mismatch_count = 0;
            }
            state.mismatch_count
        };

        let mut actions_taken = Vec::new();
        if has_mismatch {
            actions_taken = self
                .handle_mismatches(
                    &venue_key,
                    mismatch_count,
                    &order_mismatches,
                    &position_mismatches,
                    &internal_positions,
                )
                .await?;
        }

        let report = VenueReconReport {
            venue: venue_key.clone(),
            status: if has_mismatch { "mismatch" } else { "ok" }.to_string(),
            orders_checked: internal_orders.len(),
            order_mismatches,
            positions_checked: internal_positions.len().max(venue_positions.len()),
            position_mismatches,
            auto_corrected,
            actions_taken,
            mismatch_count,
        };
        info!(
            venue = %venue_key,
            status = %report.status,
            orders = report.orders_checked,
            mismatches = report.order_mismatches.len() + report.position_mismatches.len(),
            "recon_complete"
        );
        Ok(report)
    }

    /// Compare one internal order with the venue's view. Returns the
    /// mismatch list and whether the safe auto-correction fired.
    async fn reconcile_single_order(
        &self,
        internal: &Order,
        venue_order: Option<&VenueOrderRow>,
    ) -> StoreResult<(Vec<OrderMismatch>, bool)> {
        let mut mismatches = Vec::new();
        let mut corrected = false;

        let Some(venue_order) = venue_order else {
            mismatches.push(OrderMismatch {
                order_id: internal.id,
                venue_order_id: internal.venue_order_id.clone(),
                field: "presence".to_string(),
                internal: internal.status.as_str().to_string(),
                venue: "not_found".to_string(),
            });
            return Ok((mismatches, corrected));
        };

        // Status, through the normalisation map.
        if !status_matches(internal.status.as_str(), &venue_order.status) {
            mismatches.push(OrderMismatch {
                order_id: internal.id,
                venue_order_id: Some(venue_order.venue_order_id.clone()),
                field: "status".to_string(),
                internal: internal.status.as_str().to_string(),
                venue: venue_order.status.clone(),
            });
        }

        // Filled size, 0.5% tolerance.
        let size_diff_pct = pct_diff(internal.filled_size, venue_order.filled_size);
        if size_diff_pct > self.config.size_tolerance_pct {
            mismatches.push(OrderMismatch {
                order_id: internal.id,
                venue_order_id: Some(venue_order.venue_order_id.clone()),
                field: "filled_size".to_string(),
                internal: internal.filled_size.to_string(),
                venue: venue_order.filled_size.to_string(),
            });
        }

        // Filled price, 0.1% tolerance, only when both sides have one.
        if let (Some(internal_price), Some(venue_price)) =
            (internal.filled_price, venue_order.avg_fill_price)
        {
            if internal_price > 0.0 && venue_price > 0.0 {
                let price_diff_pct =
                    (internal_price - venue_price).abs() / internal_price * 100.0;
                if price_diff_pct > self.config.price_tolerance_pct {
                    mismatches.push(OrderMismatch {
                        order_id: internal.id,
                        venue_order_id: Some(venue_order.venue_order_id.clone()),
                        field: "filled_price".to_string(),
                        internal: internal_price.to_string(),
                        venue: venue_price.to_string(),
                    });
                }
            }
        }

        if !mismatches.is_empty() {
            self.store
                .audit_log(
                    &AuditRecord::new(
                        "order_discrepancy_detected",
                        "order",
                        internal.id.to_string(),
                    )
                    .with_book(internal.book_id)
                    .with_severity(Severity::Warning)
                    .with_before(serde_json::json!({ "status": internal.status.as_str() }))
                    .with_after(serde_json::json!({
                        "discrepancies": mismatches,
                        "venue_status": venue_order.status,
                    })),
                )
                .await?;

            // The single safe auto-correction: venue filled, internal open.
            let venue_filled = normalize_venue_status(&venue_order.status)
                == Some(OrderStatus::Filled);
            let internally_live =
                matches!(internal.status, OrderStatus::Open | OrderStatus::Partial);
            let size_ok = pct_diff(internal.size, venue_order.filled_size)
                <= self.config.size_tolerance_pct;
            if venue_filled && internally_live && size_ok {
                let mut promoted = internal.clone();
                promoted.status = OrderStatus::Filled;
                promoted.filled_size = venue_order.filled_size;
                if let Some(p) = venue_order.avg_fill_price {
                    if p > 0.0 {
                        promoted.filled_price = Some(p);
                    }
                }
                promoted.updated_at = Utc::now();
                self.store.upsert_order(&promoted).await?;
                self.store
                    .audit_log(
                        &AuditRecord::new(
                            "order_status_auto_corrected",
                            "order",
                            internal.id.to_string(),
                        )
                        .with_book(internal.book_id)
                        .with_before(serde_json::json!({ "status": internal.status.as_str() }))
                        .with_after(serde_json::json!({ "status": "filled" })),
                    )
                    .await?;
                info!(order_id = %internal.id, "order_status_auto_corrected");
                corrected = true;
            }
        }

        Ok((mismatches, corrected))
    }

    fn compare_positions(
        &self,
        internal: &[cxd_domain::Position],
        venue: &[cxd_venues::VenuePositionRow],
    ) -> Vec<PositionMismatch> {
        let mut instruments: BTreeSet<String> = BTreeSet::new();
        let internal_by: BTreeMap<String, f64> = internal
            .iter()
            .map(|p| (p.instrument.to_uppercase(), p.size))
            .collect();
        let venue_by: BTreeMap<String, f64> = venue
            .iter()
            .map(|p| (p.instrument.to_uppercase(), p.size))
            .collect();
        instruments.extend(internal_by.keys().cloned());
        instruments.extend(venue_by.keys().cloned());

        let mut mismatches = Vec::new();
        for instrument in instruments {
            let internal_size = internal_by.get(&instrument).copied().unwrap_or(0.0);
            let venue_size = venue_by.get(&instrument).copied().unwrap_or(0.0);

            if internal_size == 0.0 && venue_size != 0.0 {
                mismatches.push(PositionMismatch {
                    kind: "missing_internal".to_string(),
                    instrument,
                    internal_size,
                    venue_size,
                    diff_pct: 100.0,
                });
                continue;
            }
            if internal_size != 0.0 && venue_size == 0.0 {
                mismatches.push(PositionMismatch {
                    kind: "missing_venue".to_string(),
                    instrument,
                    internal_size,
                    venue_size,
                    diff_pct: 100.0,
                });
                continue;
            }
            if internal_size == 0.0 {
                continue;
            }
            let diff_pct = (venue_size - internal_size).abs() / internal_size * 100.0;
            if diff_pct > self.config.size_tolerance_pct {
                mismatches.push(PositionMismatch {
                    kind: "size_mismatch".to_string(),
                    instrument,
                    internal_size,
                    venue_size,
                    diff_pct,
                });
            }
        }
        mismatches
    }

    /// Flag basis strategies whose hedge ratio drifted outside the band;
    /// their owning books go reduce-only. Tenant-wide, not venue-scoped:
    /// [`ReconciliationService::run_all`] runs it once per cycle.
    pub async fn check_basis_hedge_ratios(&self) -> StoreResult<()> {
        let (lo, hi) = self.config.hedge_ratio_band;
        let rows = self.store.list_strategy_positions(&self.tenant_id).await?;

        for row in rows {
            // A flat book (both legs zero) is not a hedge mismatch.
            if row.spot_position == 0.0 && row.deriv_position == 0.0 {
                continue;
            }
            if (lo..=hi).contains(&row.hedged_ratio) {
                continue;
            }

            warn!(
                strategy_id = %row.strategy_id,
                hedged_ratio = row.hedged_ratio,
                "basis_hedge_ratio_mismatch"
            );
            self.store
                .create_alert(
                    &Alert::new(
                        "Basis Hedge Ratio Mismatch",
                        format!(
                            "hedged ratio {:.4} outside [{lo}, {hi}] for strategy {}",
                            row.hedged_ratio, row.strategy_id
                        ),
                        Severity::Warning,
                        "reconciliation",
                    )
                    .with_metadata(serde_json::json!({
                        "strategy_id": row.strategy_id,
                        "hedged_ratio": row.hedged_ratio,
                    })),
                )
                .await?;

            let book_id = self
                .store
                .fetch_strategy(row.strategy_id)
                .await?
                .and_then(|s| s.book_id);
            if let Some(book_id) = book_id {
                self.store
                    .audit_log(
                        &AuditRecord::new(
                            "basis_hedge_ratio_mismatch",
                            "strategy",
                            row.strategy_id.to_string(),
                        )
                        .with_book(book_id)
                        .with_severity(Severity::Warning)
                        .with_after(serde_json::json!({ "hedged_ratio": row.hedged_ratio })),
                    )
                    .await?;
                if let Err(e) = self
                    .oms
                    .set_reduce_only(book_id, "basis hedged ratio out of bounds")
                    .await
                {
                    error!(error = %e, book_id = %book_id, "reduce_only_request_failed");
                }
            }
        }
        Ok(())
    }

    /// Compare recorded venue inventory against adapter balances; > 2 %
    /// drift alerts and sets every book reduce-only.
    async fn check_inventory_drift(
        &self,
        venue_name: &str,
        venue_id: Uuid,
        adapter: &dyn cxd_venues::VenueAdapter,
    ) -> StoreResult<()> {
        let inventory = self
            .store
            .inventory_for_venue(&self.tenant_id, venue_id)
            .await?;
        if inventory.is_empty() {
            return Ok(());
        }
        let balances = match adapter.get_balance().await {
            Ok(b) => b,
            Err(e) => {
                warn!(venue = venue_name, error = %e, "inventory_balance_fetch_failed");
                return Ok(());
            }
        };
        let instruments = self.store.instruments_for_venue(venue_id).await?;
        let symbol_by_id: BTreeMap<Uuid, String> = instruments
            .into_iter()
            .map(|i| (i.id, i.common_symbol))
            .collect();

        for row in inventory {
            let Some(symbol) = symbol_by_id.get(&row.instrument_id) else {
                continue;
            };
            let base = symbol.split('-').next().unwrap_or(symbol);
            let balance = balances.get(base).copied().unwrap_or(0.0);
            if row.available_qty <= 0.0 {
                continue;
            }
            let diff_pct = (balance - row.available_qty).abs() / row.available_qty * 100.0;
            if diff_pct <= self.config.inventory_drift_pct {
                continue;
            }

            warn!(venue = venue_name, symbol = %symbol, diff_pct, "spot_inventory_drift");
            self.store
                .create_alert(
                    &Alert::new(
                        "Spot Inventory Drift",
                        format!("{venue_name} {symbol} drift {diff_pct:.2}%"),
                        Severity::Warning,
                        "reconciliation",
                    )
                    .with_metadata(serde_json::json!({
                        "venue": venue_name,
                        "symbol": symbol,
                        "diff_pct": diff_pct,
                    })),
                )
                .await?;
            self.store
                .audit_log(
                    &AuditRecord::new("spot_inventory_drift", "venue", venue_id.to_string())
                        .with_severity(Severity::Warning)
                        .with_after(serde_json::json!({ "symbol": symbol, "diff_pct": diff_pct })),
                )
                .await?;

            for book in self.store.list_books().await? {
                if book.status == cxd_domain::BookStatus::Active {
                    if let Err(e) = self
                        .oms
                        .set_reduce_only(book.id, &format!("inventory drift on {venue_name}"))
                        .await
                    {
                        error!(error = %e, book_id = %book.id, "reduce_only_request_failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// The ladder. Every rung is additive and audit-logged.
    async fn handle_mismatches(
        &self,
        venue_name: &str,
        mismatch_count: u32,
        order_mismatches: &[OrderMismatch],
        position_mismatches: &[PositionMismatch],
        internal_positions: &[cxd_domain::Position],
    ) -> anyhow::Result<Vec<String>> {
        let mut actions = Vec::new();

        let severity = if mismatch_count >= 3 {
            Severity::Critical
        } else {
            Severity::Warning
        };
        self.store
            .create_alert(
                &Alert::new(
                    format!("Reconciliation Mismatch: {venue_name}"),
                    format!(
                        "{} order and {} position mismatches (consecutive run {mismatch_count})",
                        order_mismatches.len(),
                        position_mismatches.len()
                    ),
                    severity,
                    "reconciliation",
                )
                .with_metadata(serde_json::json!({
                    "venue": venue_name,
                    "consecutive_count": mismatch_count,
                })),
            )
            .await?;
        actions.push("alert_created".to_string());

        self.store
            .audit_log(
                &AuditRecord::new("reconciliation_mismatch", "venue", venue_name)
                    .with_severity(severity)
                    .with_after(serde_json::json!({
                        "order_mismatches": order_mismatches,
                        "position_mismatches": position_mismatches,
                        "consecutive_count": mismatch_count,
                    })),
            )
            .await?;
        actions.push("audit_logged".to_string());

        let affected_books: BTreeSet<Uuid> = internal_positions
            .iter()
            .filter(|p| {
                position_mismatches
                    .iter()
                    .any(|m| m.instrument.eq_ignore_ascii_case(&p.instrument))
            })
            .map(|p| p.book_id)
            .collect();

        if mismatch_count >= 3 {
            self.risk
                .activate_circuit_breaker(
                    "recon_mismatch",
                    "reconciliation",
                    &format!("consecutive reconciliation mismatches on {venue_name}"),
                )
                .await?;
            actions.push("circuit_breaker_activated".to_string());

            for book_id in &affected_books {
                self.oms
                    .set_reduce_only(*book_id, &format!("reconciliation mismatches on {venue_name}"))
                    .await?;
            }
            if !affected_books.is_empty() {
                actions.push("books_reduce_only".to_string());
            }
        }

        if mismatch_count >= 5 {
            for book_id in &affected_books {
                self.risk
                    .activate_kill_switch(
                        Some(*book_id),
                        &format!("reconciliation mismatches exceeded threshold on {venue_name}"),
                    )
                    .await?;
            }
            if !affected_books.is_empty() {
                actions.push("kill_switch_activated".to_string());
            }
        }

        Ok(actions)
    }
}

fn find_venue_order<'a>(
    internal: &Order,
    venue_orders: &'a [VenueOrderRow],
) -> Option<&'a VenueOrderRow> {
    venue_orders
        .iter()
        .find(|v| v.client_order_id == Some(internal.id))
        .or_else(|| {
            internal.venue_order_id.as_ref().and_then(|vid| {
                venue_orders.iter().find(|v| v.venue_order_id == *vid)
            })
        })
}

/// Percent difference of `b` against `a`, safe around zero.
fn pct_diff(a: f64, b: f64) -> f64 {
    let denom = a.abs().max(1e-4);
    (a - b).abs() / denom * 100.0
}
