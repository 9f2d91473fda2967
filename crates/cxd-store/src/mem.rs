//! In-memory [`Store`] implementation.
//!
//! Backs tests and paper runs. All state lives in one `Inner` behind a
//! single async mutex: contention is irrelevant at test scale and the single
//! lock gives per-book exposure updates and strategy-position updates their
//! required serialisation for free.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use cxd_domain::{Alert, AuditRecord, Book, BookStatus, Order, Position, VenueHealth};

use crate::rows::*;
use crate::{Store, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    orders: BTreeMap<Uuid, Order>,
    positions: BTreeMap<Uuid, Position>,
    books: BTreeMap<Uuid, Book>,
    venues: BTreeMap<Uuid, VenueRow>,
    instruments: BTreeMap<Uuid, InstrumentRow>,
    strategies: BTreeMap<Uuid, StrategyRow>,
    allocations: BTreeMap<(String, Uuid), AllocationRow>,
    performance: Vec<PerformanceRow>,
    risk_metrics: Vec<RiskMetricsRow>,
    allocator_decisions: Vec<AllocatorDecisionRow>,
    regimes: Vec<RegimeRow>,
    strategy_positions: BTreeMap<(String, Uuid, Uuid), StrategyPositionRow>,
    inventory: BTreeMap<(String, Uuid, Uuid), InventoryRow>,
    multi_leg_intents: BTreeMap<Uuid, MultiLegIntentRow>,
    leg_events: Vec<LegEventRow>,
    audit: Vec<AuditRecord>,
    alerts: Vec<Alert>,
    /// Kill switches keyed by scope; `None` key = global.
    kill_switches: BTreeMap<Option<Uuid>, (bool, String)>,
}

/// Cloneable handle; all clones share the same state.
#[derive(Clone, Default)]
pub struct MemStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test support: count of audit records matching an action name.
    pub async fn audit_count(&self, action: &str) -> usize {
        let g = self.inner.lock().await;
        g.audit.iter().filter(|a| a.action == action).count()
    }

    /// Test support: all audit actions in insertion order.
    pub async fn audit_actions(&self) -> Vec<String> {
        let g = self.inner.lock().await;
        g.audit.iter().map(|a| a.action.clone()).collect()
    }

    /// Test support: all alert titles in insertion order.
    pub async fn alert_titles(&self) -> Vec<String> {
        let g = self.inner.lock().await;
        g.alerts.iter().map(|a| a.title.clone()).collect()
    }

    /// Test support: all stored orders in id order.
    pub async fn all_orders(&self) -> Vec<Order> {
        let g = self.inner.lock().await;
        g.orders.values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn upsert_order(&self, order: &Order) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn fetch_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let g = self.inner.lock().await;
        Ok(g.orders.get(&id).cloned())
    }

    async fn open_orders_for_venue(
        &self,
        venue_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Order>> {
        let g = self.inner.lock().await;
        Ok(g.orders
            .values()
            .filter(|o| {
                o.venue_id == Some(venue_id) && !o.status.is_terminal() && o.created_at >= since
            })
            .cloned()
            .collect())
    }

    async fn upsert_position(&self, position: &Position) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn open_positions_for_book(&self, book_id: Uuid) -> StoreResult<Vec<Position>> {
        let g = self.inner.lock().await;
        Ok(g.positions
            .values()
            .filter(|p| p.book_id == book_id && p.is_open)
            .cloned()
            .collect())
    }

    async fn open_positions_for_venue(&self, venue_id: Uuid) -> StoreResult<Vec<Position>> {
        let g = self.inner.lock().await;
        Ok(g.positions
            .values()
            .filter(|p| p.venue_id == Some(venue_id) && p.is_open)
            .cloned()
            .collect())
    }

    async fn upsert_book(&self, book: &Book) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.books.insert(book.id, book.clone());
        Ok(())
    }

    async fn fetch_book(&self, id: Uuid) -> StoreResult<Option<Book>> {
        let g = self.inner.lock().await;
        Ok(g.books.get(&id).cloned())
    }

    async fn list_books(&self) -> StoreResult<Vec<Book>> {
        let g = self.inner.lock().await;
        Ok(g.books.values().cloned().collect())
    }

    async fn update_book_status(&self, id: Uuid, status: BookStatus) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        let book = g.books.get_mut(&id).ok_or(StoreError::NotFound {
            what: "book",
            id: id.to_string(),
        })?;
        book.status = status;
        book.updated_at = Utc::now();
        Ok(())
    }

    async fn apply_book_exposure_delta(&self, id: Uuid, delta: f64) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        let book = g.books.get_mut(&id).ok_or(StoreError::NotFound {
            what: "book",
            id: id.to_string(),
        })?;
        book.current_exposure += delta;
        book.updated_at = Utc::now();
        Ok(())
    }

    async fn upsert_venue(&self, venue: &VenueRow) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.venues.insert(venue.id, venue.clone());
        Ok(())
    }

    async fn fetch_venue(&self, id: Uuid) -> StoreResult<Option<VenueRow>> {
        let g = self.inner.lock().await;
        Ok(g.venues.get(&id).cloned())
    }

    async fn venue_by_name(&self, name: &str) -> StoreResult<Option<VenueRow>> {
        let g = self.inner.lock().await;
        Ok(g.venues
            .values()
            .find(|v| v.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn list_venues(&self) -> StoreResult<Vec<VenueRow>> {
        let g = self.inner.lock().await;
        Ok(g.venues.values().cloned().collect())
    }

    async fn record_venue_health(&self, health: &VenueHealth) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        let existing_id = g
            .venues
            .values()
            .find(|v| v.name.eq_ignore_ascii_case(&health.name))
            .map(|v| v.id);

        match existing_id {
            Some(id) => {
                let v = g.venues.get_mut(&id).expect("looked up above");
                v.status = health.status;
                v.latency_ms = health.latency_ms;
                v.error_rate = health.error_rate;
                v.last_heartbeat = health.last_heartbeat;
                v.is_enabled = health.is_enabled;
                if !health.supported_instruments.is_empty() {
                    v.supported_instruments = health.supported_instruments.clone();
                }
            }
            None => {
                let mut v = VenueRow::new(health.name.clone(), "spot");
                v.id = health.venue_id;
                v.status = health.status;
                v.latency_ms = health.latency_ms;
                v.error_rate = health.error_rate;
                v.last_heartbeat = health.last_heartbeat;
                v.is_enabled = health.is_enabled;
                v.supported_instruments = health.supported_instruments.clone();
                g.venues.insert(v.id, v);
            }
        }
        Ok(())
    }

    async fn upsert_instrument(&self, row: &InstrumentRow) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.instruments.insert(row.id, row.clone());
        Ok(())
    }

    async fn instrument_by_symbol(
        &self,
        tenant_id: &str,
        common_symbol: &str,
    ) -> StoreResult<Option<InstrumentRow>> {
        let g = self.inner.lock().await;
        Ok(g.instruments
            .values()
            .find(|i| i.tenant_id == tenant_id && i.common_symbol.eq_ignore_ascii_case(common_symbol))
            .cloned())
    }

    async fn instruments_for_venue(&self, venue_id: Uuid) -> StoreResult<Vec<InstrumentRow>> {
        let g = self.inner.lock().await;
        Ok(g.instruments
            .values()
            .filter(|i| i.venue_id == venue_id)
            .cloned()
            .collect())
    }

    async fn upsert_strategy(&self, row: &StrategyRow) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.strategies.insert(row.id, row.clone());
        Ok(())
    }

    async fn list_strategies(&self, tenant_id: &str) -> StoreResult<Vec<StrategyRow>> {
        let g = self.inner.lock().await;
        Ok(g.strategies
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn fetch_strategy(&self, id: Uuid) -> StoreResult<Option<StrategyRow>> {
        let g = self.inner.lock().await;
        Ok(g.strategies.get(&id).cloned())
    }

    async fn set_strategy_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        if let Some(s) = g.strategies.get_mut(&id) {
            s.enabled = enabled;
        }
        Ok(())
    }

    async fn upsert_allocation(&self, row: &AllocationRow) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.allocations
            .insert((row.tenant_id.clone(), row.strategy_id), row.clone());
        Ok(())
    }

    async fn allocation_map(&self, tenant_id: &str) -> StoreResult<Vec<AllocationRow>> {
        let g = self.inner.lock().await;
        Ok(g.allocations
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn record_performance(&self, row: &PerformanceRow) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.performance.push(row.clone());
        Ok(())
    }

    async fn latest_performance(&self, tenant_id: &str) -> StoreResult<Vec<PerformanceRow>> {
        let g = self.inner.lock().await;
        Ok(latest_by(
            g.performance.iter().filter(|r| r.tenant_id == tenant_id),
            |r| r.strategy_id,
            |r| r.ts,
        ))
    }

    async fn record_risk_metrics(&self, row: &RiskMetricsRow) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.risk_metrics.push(row.clone());
        Ok(())
    }

    async fn latest_risk_metrics(&self, tenant_id: &str) -> StoreResult<Vec<RiskMetricsRow>> {
        let g = self.inner.lock().await;
        Ok(latest_by(
            g.risk_metrics.iter().filter(|r| r.tenant_id == tenant_id),
            |r| r.strategy_id,
            |r| r.ts,
        ))
    }

    async fn record_allocator_decision(&self, row: &AllocatorDecisionRow) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.allocator_decisions.push(row.clone());
        Ok(())
    }

    async fn latest_allocator_decision(
        &self,
        tenant_id: &str,
    ) -> StoreResult<Option<AllocatorDecisionRow>> {
        let g = self.inner.lock().await;
        Ok(g.allocator_decisions
            .iter()
            .filter(|d| d.tenant_id == tenant_id)
            .max_by_key(|d| d.ts)
            .cloned())
    }

    async fn record_regime(&self, row: &RegimeRow) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.regimes.push(row.clone());
        Ok(())
    }

    async fn apply_strategy_position_delta(
        &self,
        tenant_id: &str,
        strategy_id: Uuid,
        instrument_id: Uuid,
        venue_type: &str,
        size_delta: f64,
    ) -> StoreResult<StrategyPositionRow> {
        let mut g = self.inner.lock().await;
        let key = (tenant_id.to_string(), strategy_id, instrument_id);
        let row = g.strategy_positions.entry(key).or_insert_with(|| {
            StrategyPositionRow {
                id: Uuid::new_v4(),
                tenant_id: tenant_id.to_string(),
                strategy_id,
                instrument_id,
                spot_position: 0.0,
                deriv_position: 0.0,
                hedged_ratio: 0.0,
                updated_at: Utc::now(),
            }
        });
        if venue_type == "spot" {
            row.spot_position += size_delta;
        } else {
            row.deriv_position += size_delta;
        }
        row.hedged_ratio = if row.deriv_position != 0.0 {
            (row.spot_position / row.deriv_position).abs()
        } else {
            0.0
        };
        row.updated_at = Utc::now();
        Ok(row.clone())
    }

    async fn list_strategy_positions(
        &self,
        tenant_id: &str,
    ) -> StoreResult<Vec<StrategyPositionRow>> {
        let g = self.inner.lock().await;
        Ok(g.strategy_positions
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn upsert_inventory(&self, row: &InventoryRow) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.inventory.insert(
            (row.tenant_id.clone(), row.venue_id, row.instrument_id),
            row.clone(),
        );
        Ok(())
    }

    async fn inventory_for_venue(
        &self,
        tenant_id: &str,
        venue_id: Uuid,
    ) -> StoreResult<Vec<InventoryRow>> {
        let g = self.inner.lock().await;
        Ok(g.inventory
            .values()
            .filter(|r| r.tenant_id == tenant_id && r.venue_id == venue_id)
            .cloned()
            .collect())
    }

    async fn insert_multi_leg_intent(&self, row: &MultiLegIntentRow) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.multi_leg_intents.insert(row.intent_id, row.clone());
        Ok(())
    }

    async fn update_multi_leg_status(&self, intent_id: Uuid, status: &str) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        if let Some(row) = g.multi_leg_intents.get_mut(&intent_id) {
            row.status = status.to_string();
        }
        Ok(())
    }

    async fn fetch_multi_leg_intent(
        &self,
        intent_id: Uuid,
    ) -> StoreResult<Option<MultiLegIntentRow>> {
        let g = self.inner.lock().await;
        Ok(g.multi_leg_intents.get(&intent_id).cloned())
    }

    async fn insert_leg_event(&self, row: &LegEventRow) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.leg_events.push(row.clone());
        Ok(())
    }

    async fn leg_events_for_intent(&self, intent_id: Uuid) -> StoreResult<Vec<LegEventRow>> {
        let g = self.inner.lock().await;
        Ok(g.leg_events
            .iter()
            .filter(|e| e.intent_id == intent_id)
            .cloned()
            .collect())
    }

    async fn audit_log(&self, record: &AuditRecord) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.audit.push(record.clone());
        Ok(())
    }

    async fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditRecord>> {
        let g = self.inner.lock().await;
        let start = g.audit.len().saturating_sub(limit);
        Ok(g.audit[start..].to_vec())
    }

    async fn create_alert(&self, alert: &Alert) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.alerts.push(alert.clone());
        Ok(())
    }

    async fn recent_alerts(&self, limit: usize) -> StoreResult<Vec<Alert>> {
        let g = self.inner.lock().await;
        let start = g.alerts.len().saturating_sub(limit);
        Ok(g.alerts[start..].to_vec())
    }

    async fn kill_switch(&self, book_id: Option<Uuid>) -> StoreResult<Option<String>> {
        let g = self.inner.lock().await;
        if let Some((true, reason)) = g.kill_switches.get(&None) {
            return Ok(Some(reason.clone()));
        }
        if book_id.is_some() {
            if let Some((true, reason)) = g.kill_switches.get(&book_id) {
                return Ok(Some(reason.clone()));
            }
        }
        Ok(None)
    }

    async fn set_kill_switch(
        &self,
        book_id: Option<Uuid>,
        active: bool,
        reason: &str,
    ) -> StoreResult<()> {
        let mut g = self.inner.lock().await;
        g.kill_switches
            .insert(book_id, (active, reason.to_string()));
        Ok(())
    }
}

/// Latest row per key by timestamp, deterministic over insertion order.
fn latest_by<'a, T, I, K, F, G>(rows: I, key: F, ts: G) -> Vec<T>
where
    T: Clone + 'a,
    I: Iterator<Item = &'a T>,
    K: Ord,
    F: Fn(&T) -> K,
    G: Fn(&T) -> DateTime<Utc>,
{
    let mut latest: BTreeMap<K, &T> = BTreeMap::new();
    for row in rows {
        let k = key(row);
        match latest.get(&k) {
            Some(existing) if ts(existing) >= ts(row) => {}
            _ => {
                latest.insert(k, row);
            }
        }
    }
    latest.into_values().cloned().collect()
}
