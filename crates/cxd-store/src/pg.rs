//! Postgres [`Store`] implementation over sqlx.
//!
//! Queries are runtime-bound (`sqlx::query` + `bind`), mirroring the schema
//! in `migrations/`. Enum-ish columns are stored as text and parsed back at
//! the boundary; JSON payloads (metadata, plans, rationale) are `jsonb`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use cxd_domain::{
    Alert, AuditRecord, Book, BookStatus, Order, OrderStatus, OrderType, Position, Severity, Side,
    VenueHealth, VenueStatus,
};

use crate::rows::*;
use crate::{Store, StoreError, StoreResult};

pub const ENV_DB_URL: &str = "CXD_DATABASE_URL";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `CXD_DATABASE_URL`.
    pub async fn connect_from_env() -> anyhow::Result<Self> {
        let url = std::env::var(ENV_DB_URL)
            .map_err(|_| anyhow::anyhow!("missing env var {ENV_DB_URL}"))?;
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run embedded migrations.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn parse_side(s: &str) -> StoreResult<Side> {
    match s {
        "buy" => Ok(Side::Buy),
        "sell" => Ok(Side::Sell),
        other => Err(StoreError::Backend(format!("bad side column: {other}"))),
    }
}

fn parse_order_type(s: &str) -> StoreResult<OrderType> {
    match s {
        "market" => Ok(OrderType::Market),
        "limit" => Ok(OrderType::Limit),
        "stop" => Ok(OrderType::Stop),
        other => Err(StoreError::Backend(format!("bad order_type column: {other}"))),
    }
}

fn parse_order_status(s: &str) -> StoreResult<OrderStatus> {
    OrderStatus::parse(s).ok_or_else(|| StoreError::Backend(format!("bad status column: {s}")))
}

fn parse_book_status(s: &str) -> StoreResult<BookStatus> {
    BookStatus::parse(s).ok_or_else(|| StoreError::Backend(format!("bad book status: {s}")))
}

fn parse_venue_status(s: &str) -> StoreResult<VenueStatus> {
    VenueStatus::parse(s).ok_or_else(|| StoreError::Backend(format!("bad venue status: {s}")))
}

fn parse_severity(s: &str) -> StoreResult<Severity> {
    match s {
        "info" => Ok(Severity::Info),
        "warning" => Ok(Severity::Warning),
        "critical" => Ok(Severity::Critical),
        other => Err(StoreError::Backend(format!("bad severity column: {other}"))),
    }
}

fn order_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<Order> {
    let side: String = row.try_get("side")?;
    let order_type: String = row.try_get("order_type")?;
    let status: String = row.try_get("status")?;
    Ok(Order {
        id: row.try_get("id")?,
        book_id: row.try_get("book_id")?,
        strategy_id: row.try_get("strategy_id")?,
        venue_id: row.try_get("venue_id")?,
        instrument: row.try_get("instrument")?,
        side: parse_side(&side)?,
        size: row.try_get("size")?,
        order_type: parse_order_type(&order_type)?,
        price: row.try_get("price")?,
        status: parse_order_status(&status)?,
        filled_size: row.try_get("filled_size")?,
        filled_price: row.try_get("filled_price")?,
        slippage_bps: row.try_get("slippage")?,
        latency_ms: row.try_get("latency_ms")?,
        venue_order_id: row.try_get("venue_order_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn position_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<Position> {
    let side: String = row.try_get("side")?;
    Ok(Position {
        id: row.try_get("id")?,
        book_id: row.try_get("book_id")?,
        venue_id: row.try_get("venue_id")?,
        instrument: row.try_get("instrument")?,
        side: parse_side(&side)?,
        size: row.try_get("size")?,
        entry_price: row.try_get("entry_price")?,
        mark_price: row.try_get("mark_price")?,
        unrealized_pnl: row.try_get("unrealized_pnl")?,
        realized_pnl: row.try_get("realized_pnl")?,
        is_open: row.try_get("is_open")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn book_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<Book> {
    let status: String = row.try_get("status")?;
    Ok(Book {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        book_type: row.try_get("book_type")?,
        capital_allocated: row.try_get("capital_allocated")?,
        current_exposure: row.try_get("current_exposure")?,
        max_exposure: row.try_get("max_exposure")?,
        max_drawdown_limit: row.try_get("max_drawdown_limit")?,
        status: parse_book_status(&status)?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn venue_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<VenueRow> {
    let status: String = row.try_get("status")?;
    let instruments: serde_json::Value = row.try_get("supported_instruments")?;
    Ok(VenueRow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        venue_type: row.try_get("venue_type")?,
        status: parse_venue_status(&status)?,
        latency_ms: row.try_get("latency_ms")?,
        error_rate: row.try_get("error_rate")?,
        last_heartbeat: row.try_get("last_heartbeat")?,
        is_enabled: row.try_get("is_enabled")?,
        supported_instruments: serde_json::from_value(instruments)?,
    })
}

fn strategy_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<StrategyRow> {
    Ok(StrategyRow {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        strategy_type: row.try_get("strategy_type")?,
        enabled: row.try_get("enabled")?,
        max_notional: row.try_get("max_notional")?,
        min_notional: row.try_get("min_notional")?,
        capacity_estimate: row.try_get("capacity_estimate")?,
        book_id: row.try_get("book_id")?,
        parameters: row.try_get("parameters")?,
        created_at: row.try_get("created_at")?,
    })
}

fn strategy_position_from_row(row: &sqlx::postgres::PgRow) -> StoreResult<StrategyPositionRow> {
    Ok(StrategyPositionRow {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        strategy_id: row.try_get("strategy_id")?,
        instrument_id: row.try_get("instrument_id")?,
        spot_position: row.try_get("spot_position")?,
        deriv_position: row.try_get("deriv_position")?,
        hedged_ratio: row.try_get("hedged_ratio")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ---------------------------------------------------------------------------
// Store impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Store for PgStore {
    async fn upsert_order(&self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into orders (
              id, book_id, strategy_id, venue_id, instrument, side, size,
              order_type, price, status, filled_size, filled_price, slippage,
              latency_ms, venue_order_id, created_at, updated_at
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
            on conflict (id) do update set
              status = excluded.status,
              filled_size = excluded.filled_size,
              filled_price = excluded.filled_price,
              slippage = excluded.slippage,
              latency_ms = excluded.latency_ms,
              venue_order_id = excluded.venue_order_id,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(order.id)
        .bind(order.book_id)
        .bind(order.strategy_id)
        .bind(order.venue_id)
        .bind(&order.instrument)
        .bind(order.side.to_string())
        .bind(order.size)
        .bind(order.order_type.to_string())
        .bind(order.price)
        .bind(order.status.as_str())
        .bind(order.filled_size)
        .bind(order.filled_price)
        .bind(order.slippage_bps)
        .bind(order.latency_ms)
        .bind(&order.venue_order_id)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let row = sqlx::query("select * from orders where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn open_orders_for_venue(
        &self,
        venue_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Order>> {
        let rows = sqlx::query(
            r#"
            select * from orders
            where venue_id = $1
              and status not in ('filled','rejected','cancelled')
              and created_at >= $2
            order by created_at
            "#,
        )
        .bind(venue_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }

    async fn upsert_position(&self, position: &Position) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into positions (
              id, book_id, venue_id, instrument, side, size, entry_price,
              mark_price, unrealized_pnl, realized_pnl, is_open, updated_at
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
            on conflict (id) do update set
              size = excluded.size,
              entry_price = excluded.entry_price,
              mark_price = excluded.mark_price,
              unrealized_pnl = excluded.unrealized_pnl,
              realized_pnl = excluded.realized_pnl,
              is_open = excluded.is_open,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(position.id)
        .bind(position.book_id)
        .bind(position.venue_id)
        .bind(&position.instrument)
        .bind(position.side.to_string())
        .bind(position.size)
        .bind(position.entry_price)
        .bind(position.mark_price)
        .bind(position.unrealized_pnl)
        .bind(position.realized_pnl)
        .bind(position.is_open)
        .bind(position.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn open_positions_for_book(&self, book_id: Uuid) -> StoreResult<Vec<Position>> {
        let rows = sqlx::query(
            "select * from positions where book_id = $1 and is_open order by instrument",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(position_from_row).collect()
    }

    async fn open_positions_for_venue(&self, venue_id: Uuid) -> StoreResult<Vec<Position>> {
        let rows = sqlx::query(
            "select * from positions where venue_id = $1 and is_open order by instrument",
        )
        .bind(venue_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(position_from_row).collect()
    }

    async fn upsert_book(&self, book: &Book) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into books (
              id, name, book_type, capital_allocated, current_exposure,
              max_exposure, max_drawdown_limit, status, updated_at
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            on conflict (id) do update set
              capital_allocated = excluded.capital_allocated,
              current_exposure = excluded.current_exposure,
              max_exposure = excluded.max_exposure,
              max_drawdown_limit = excluded.max_drawdown_limit,
              status = excluded.status,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(book.id)
        .bind(&book.name)
        .bind(&book.book_type)
        .bind(book.capital_allocated)
        .bind(book.current_exposure)
        .bind(book.max_exposure)
        .bind(book.max_drawdown_limit)
        .bind(book.status.as_str())
        .bind(book.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_book(&self, id: Uuid) -> StoreResult<Option<Book>> {
        let row = sqlx::query("select * from books where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(book_from_row).transpose()
    }

    async fn list_books(&self) -> StoreResult<Vec<Book>> {
        let rows = sqlx::query("select * from books order by name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(book_from_row).collect()
    }

    async fn update_book_status(&self, id: Uuid, status: BookStatus) -> StoreResult<()> {
        let res = sqlx::query("update books set status = $2, updated_at = now() where id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: "book",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn apply_book_exposure_delta(&self, id: Uuid, delta: f64) -> StoreResult<()> {
        // Single UPDATE keeps per-book exposure mutations serialised in PG.
        let res = sqlx::query(
            r#"
            update books
            set current_exposure = current_exposure + $2, updated_at = now()
            where id = $1
            "#,
        )
        .bind(id)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: "book",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn upsert_venue(&self, venue: &VenueRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into venues (
              id, name, venue_type, status, latency_ms, error_rate,
              last_heartbeat, is_enabled, supported_instruments
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            on conflict (id) do update set
              status = excluded.status,
              latency_ms = excluded.latency_ms,
              error_rate = excluded.error_rate,
              last_heartbeat = excluded.last_heartbeat,
              is_enabled = excluded.is_enabled,
              supported_instruments = excluded.supported_instruments
            "#,
        )
        .bind(venue.id)
        .bind(&venue.name)
        .bind(&venue.venue_type)
        .bind(venue.status.as_str())
        .bind(venue.latency_ms)
        .bind(venue.error_rate)
        .bind(venue.last_heartbeat)
        .bind(venue.is_enabled)
        .bind(serde_json::to_value(&venue.supported_instruments)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_venue(&self, id: Uuid) -> StoreResult<Option<VenueRow>> {
        let row = sqlx::query("select * from venues where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(venue_from_row).transpose()
    }

    async fn venue_by_name(&self, name: &str) -> StoreResult<Option<VenueRow>> {
        let row = sqlx::query("select * from venues where lower(name) = lower($1)")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(venue_from_row).transpose()
    }

    async fn list_venues(&self) -> StoreResult<Vec<VenueRow>> {
        let rows = sqlx::query("select * from venues order by name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(venue_from_row).collect()
    }

    async fn record_venue_health(&self, health: &VenueHealth) -> StoreResult<()> {
        let res = sqlx::query(
            r#"
            update venues set
              status = $2, latency_ms = $3, error_rate = $4,
              last_heartbeat = $5, is_enabled = $6
            where lower(name) = lower($1)
            "#,
        )
        .bind(&health.name)
        .bind(health.status.as_str())
        .bind(health.latency_ms)
        .bind(health.error_rate)
        .bind(health.last_heartbeat)
        .bind(health.is_enabled)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            let mut row = VenueRow::new(health.name.clone(), "spot");
            row.id = health.venue_id;
            row.status = health.status;
            row.latency_ms = health.latency_ms;
            row.error_rate = health.error_rate;
            row.last_heartbeat = health.last_heartbeat;
            row.is_enabled = health.is_enabled;
            row.supported_instruments = health.supported_instruments.clone();
            self.upsert_venue(&row).await?;
        }
        Ok(())
    }

    async fn upsert_instrument(&self, row: &InstrumentRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into instruments (id, tenant_id, venue_id, venue_symbol, common_symbol)
            values ($1,$2,$3,$4,$5)
            on conflict (id) do update set
              venue_symbol = excluded.venue_symbol,
              common_symbol = excluded.common_symbol
            "#,
        )
        .bind(row.id)
        .bind(&row.tenant_id)
        .bind(row.venue_id)
        .bind(&row.venue_symbol)
        .bind(&row.common_symbol)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn instrument_by_symbol(
        &self,
        tenant_id: &str,
        common_symbol: &str,
    ) -> StoreResult<Option<InstrumentRow>> {
        let row = sqlx::query(
            r#"
            select * from instruments
            where tenant_id = $1 and lower(common_symbol) = lower($2)
            limit 1
            "#,
        )
        .bind(tenant_id)
        .bind(common_symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(InstrumentRow {
                id: r.try_get("id")?,
                tenant_id: r.try_get("tenant_id")?,
                venue_id: r.try_get("venue_id")?,
                venue_symbol: r.try_get("venue_symbol")?,
                common_symbol: r.try_get("common_symbol")?,
            })
        })
        .transpose()
    }

    async fn instruments_for_venue(&self, venue_id: Uuid) -> StoreResult<Vec<InstrumentRow>> {
        let rows = sqlx::query("select * from instruments where venue_id = $1")
            .bind(venue_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| {
                Ok(InstrumentRow {
                    id: r.try_get("id")?,
                    tenant_id: r.try_get("tenant_id")?,
                    venue_id: r.try_get("venue_id")?,
                    venue_symbol: r.try_get("venue_symbol")?,
                    common_symbol: r.try_get("common_symbol")?,
                })
            })
            .collect()
    }

    async fn upsert_strategy(&self, row: &StrategyRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into strategies (
              id, tenant_id, name, strategy_type, enabled, max_notional,
              min_notional, capacity_estimate, book_id, parameters, created_at
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            on conflict (id) do update set
              enabled = excluded.enabled,
              max_notional = excluded.max_notional,
              min_notional = excluded.min_notional,
              capacity_estimate = excluded.capacity_estimate,
              book_id = excluded.book_id,
              parameters = excluded.parameters
            "#,
        )
        .bind(row.id)
        .bind(&row.tenant_id)
        .bind(&row.name)
        .bind(&row.strategy_type)
        .bind(row.enabled)
        .bind(row.max_notional)
        .bind(row.min_notional)
        .bind(row.capacity_estimate)
        .bind(row.book_id)
        .bind(&row.parameters)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_strategies(&self, tenant_id: &str) -> StoreResult<Vec<StrategyRow>> {
        let rows = sqlx::query("select * from strategies where tenant_id = $1 order by name")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(strategy_from_row).collect()
    }

    async fn fetch_strategy(&self, id: Uuid) -> StoreResult<Option<StrategyRow>> {
        let row = sqlx::query("select * from strategies where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(strategy_from_row).transpose()
    }

    async fn set_strategy_enabled(&self, id: Uuid, enabled: bool) -> StoreResult<()> {
        sqlx::query("update strategies set enabled = $2 where id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_allocation(&self, row: &AllocationRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into strategy_allocations (
              tenant_id, strategy_id, allocated_capital, allocation_pct,
              leverage_cap, risk_multiplier, updated_at
            ) values ($1,$2,$3,$4,$5,$6,$7)
            on conflict (tenant_id, strategy_id) do update set
              allocated_capital = excluded.allocated_capital,
              allocation_pct = excluded.allocation_pct,
              leverage_cap = excluded.leverage_cap,
              risk_multiplier = excluded.risk_multiplier,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.tenant_id)
        .bind(row.strategy_id)
        .bind(row.allocated_capital)
        .bind(row.allocation_pct)
        .bind(row.leverage_cap)
        .bind(row.risk_multiplier)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn allocation_map(&self, tenant_id: &str) -> StoreResult<Vec<AllocationRow>> {
        let rows = sqlx::query("select * from strategy_allocations where tenant_id = $1")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| {
                Ok(AllocationRow {
                    tenant_id: r.try_get("tenant_id")?,
                    strategy_id: r.try_get("strategy_id")?,
                    allocated_capital: r.try_get("allocated_capital")?,
                    allocation_pct: r.try_get("allocation_pct")?,
                    leverage_cap: r.try_get("leverage_cap")?,
                    risk_multiplier: r.try_get("risk_multiplier")?,
                    updated_at: r.try_get("updated_at")?,
                })
            })
            .collect()
    }

    async fn record_performance(&self, row: &PerformanceRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into strategy_performance (
              tenant_id, strategy_id, metric_window, pnl, sharpe, sortino, max_drawdown,
              win_rate, turnover, ts
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
            "#,
        )
        .bind(&row.tenant_id)
        .bind(row.strategy_id)
        .bind(&row.window)
        .bind(row.pnl)
        .bind(row.sharpe)
        .bind(row.sortino)
        .bind(row.max_drawdown)
        .bind(row.win_rate)
        .bind(row.turnover)
        .bind(row.ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_performance(&self, tenant_id: &str) -> StoreResult<Vec<PerformanceRow>> {
        let rows = sqlx::query(
            r#"
            select distinct on (strategy_id) *
            from strategy_performance
            where tenant_id = $1
            order by strategy_id, ts desc
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(PerformanceRow {
                    tenant_id: r.try_get("tenant_id")?,
                    strategy_id: r.try_get("strategy_id")?,
                    window: r.try_get("metric_window")?,
                    pnl: r.try_get("pnl")?,
                    sharpe: r.try_get("sharpe")?,
                    sortino: r.try_get("sortino")?,
                    max_drawdown: r.try_get("max_drawdown")?,
                    win_rate: r.try_get("win_rate")?,
                    turnover: r.try_get("turnover")?,
                    ts: r.try_get("ts")?,
                })
            })
            .collect()
    }

    async fn record_risk_metrics(&self, row: &RiskMetricsRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into strategy_risk_metrics (
              tenant_id, strategy_id, gross_exposure, net_exposure,
              var_estimate, stress_loss_estimate, correlation_cluster, ts
            ) values ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(&row.tenant_id)
        .bind(row.strategy_id)
        .bind(row.gross_exposure)
        .bind(row.net_exposure)
        .bind(row.var_estimate)
        .bind(row.stress_loss_estimate)
        .bind(&row.correlation_cluster)
        .bind(row.ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_risk_metrics(&self, tenant_id: &str) -> StoreResult<Vec<RiskMetricsRow>> {
        let rows = sqlx::query(
            r#"
            select distinct on (strategy_id) *
            from strategy_risk_metrics
            where tenant_id = $1
            order by strategy_id, ts desc
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(RiskMetricsRow {
                    tenant_id: r.try_get("tenant_id")?,
                    strategy_id: r.try_get("strategy_id")?,
                    gross_exposure: r.try_get("gross_exposure")?,
                    net_exposure: r.try_get("net_exposure")?,
                    var_estimate: r.try_get("var_estimate")?,
                    stress_loss_estimate: r.try_get("stress_loss_estimate")?,
                    correlation_cluster: r.try_get("correlation_cluster")?,
                    ts: r.try_get("ts")?,
                })
            })
            .collect()
    }

    async fn record_allocator_decision(&self, row: &AllocatorDecisionRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into allocator_decisions (
              tenant_id, decision_id, regime_state, allocation_snapshot_json,
              rationale_json, ts
            ) values ($1,$2,$3,$4,$5,$6)
            "#,
        )
        .bind(&row.tenant_id)
        .bind(row.decision_id)
        .bind(&row.regime_state)
        .bind(&row.allocation_snapshot)
        .bind(&row.rationale)
        .bind(row.ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_allocator_decision(
        &self,
        tenant_id: &str,
    ) -> StoreResult<Option<AllocatorDecisionRow>> {
        let row = sqlx::query(
            r#"
            select * from allocator_decisions
            where tenant_id = $1
            order by ts desc limit 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| {
            Ok(AllocatorDecisionRow {
                tenant_id: r.try_get("tenant_id")?,
                decision_id: r.try_get("decision_id")?,
                regime_state: r.try_get("regime_state")?,
                allocation_snapshot: r.try_get("allocation_snapshot_json")?,
                rationale: r.try_get("rationale_json")?,
                ts: r.try_get("ts")?,
            })
        })
        .transpose()
    }

    async fn record_regime(&self, row: &RegimeRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into market_regimes (
              tenant_id, direction, volatility, liquidity, risk_bias,
              regime_state, ts
            ) values ($1,$2,$3,$4,$5,$6,$7)
            "#,
        )
        .bind(&row.tenant_id)
        .bind(&row.direction)
        .bind(&row.volatility)
        .bind(&row.liquidity)
        .bind(&row.risk_bias)
        .bind(&row.details)
        .bind(row.ts)
        .execute(&self.pool)
        .await?;
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
        let spot_delta = if venue_type == "spot" { size_delta } else { 0.0 };
        let deriv_delta = if venue_type == "spot" { 0.0 } else { size_delta };

        let row = sqlx::query(
            r#"
            insert into strategy_positions (
              id, tenant_id, strategy_id, instrument_id, spot_position,
              deriv_position, hedged_ratio, updated_at
            ) values (
              $1, $2, $3, $4, $5, $6,
              case when $6 <> 0 then abs($5 / $6) else 0 end,
              now()
            )
            on conflict (tenant_id, strategy_id, instrument_id) do update set
              spot_position = strategy_positions.spot_position + $5,
              deriv_position = strategy_positions.deriv_position + $6,
              hedged_ratio = case
                when strategy_positions.deriv_position + $6 <> 0
                then abs((strategy_positions.spot_position + $5)
                         / (strategy_positions.deriv_position + $6))
                else 0 end,
              updated_at = now()
            returning *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(strategy_id)
        .bind(instrument_id)
        .bind(spot_delta)
        .bind(deriv_delta)
        .fetch_one(&self.pool)
        .await?;
        strategy_position_from_row(&row)
    }

    async fn list_strategy_positions(
        &self,
        tenant_id: &str,
    ) -> StoreResult<Vec<StrategyPositionRow>> {
        let rows = sqlx::query("select * from strategy_positions where tenant_id = $1")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(strategy_position_from_row).collect()
    }

    async fn upsert_inventory(&self, row: &InventoryRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into venue_inventory (tenant_id, venue_id, instrument_id, available_qty)
            values ($1,$2,$3,$4)
            on conflict (tenant_id, venue_id, instrument_id) do update set
              available_qty = excluded.available_qty
            "#,
        )
        .bind(&row.tenant_id)
        .bind(row.venue_id)
        .bind(row.instrument_id)
        .bind(row.available_qty)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn inventory_for_venue(
        &self,
        tenant_id: &str,
        venue_id: Uuid,
    ) -> StoreResult<Vec<InventoryRow>> {
        let rows = sqlx::query(
            "select * from venue_inventory where tenant_id = $1 and venue_id = $2",
        )
        .bind(tenant_id)
        .bind(venue_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                Ok(InventoryRow {
                    tenant_id: r.try_get("tenant_id")?,
                    venue_id: r.try_get("venue_id")?,
                    instrument_id: r.try_get("instrument_id")?,
                    available_qty: r.try_get("available_qty")?,
                })
            })
            .collect()
    }

    async fn insert_multi_leg_intent(&self, row: &MultiLegIntentRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into multi_leg_intents (tenant_id, intent_id, legs_json, execution_mode, status)
            values ($1,$2,$3,$4,$5)
            on conflict (intent_id) do update set
              legs_json = excluded.legs_json,
              status = excluded.status
            "#,
        )
        .bind(&row.tenant_id)
        .bind(row.intent_id)
        .bind(&row.legs_json)
        .bind(&row.execution_mode)
        .bind(&row.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_multi_leg_status(&self, intent_id: Uuid, status: &str) -> StoreResult<()> {
        sqlx::query("update multi_leg_intents set status = $2 where intent_id = $1")
            .bind(intent_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_multi_leg_intent(
        &self,
        intent_id: Uuid,
    ) -> StoreResult<Option<MultiLegIntentRow>> {
        let row = sqlx::query("select * from multi_leg_intents where intent_id = $1")
            .bind(intent_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            Ok(MultiLegIntentRow {
                tenant_id: r.try_get("tenant_id")?,
                intent_id: r.try_get("intent_id")?,
                legs_json: r.try_get("legs_json")?,
                execution_mode: r.try_get("execution_mode")?,
                status: r.try_get("status")?,
            })
        })
        .transpose()
    }

    async fn insert_leg_event(&self, row: &LegEventRow) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into leg_events (tenant_id, intent_id, leg_id, event_type, payload_json, ts)
            values ($1,$2,$3,$4,$5,$6)
            "#,
        )
        .bind(&row.tenant_id)
        .bind(row.intent_id)
        .bind(row.leg_id)
        .bind(&row.event_type)
        .bind(&row.payload_json)
        .bind(row.ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn leg_events_for_intent(&self, intent_id: Uuid) -> StoreResult<Vec<LegEventRow>> {
        let rows = sqlx::query("select * from leg_events where intent_id = $1 order by ts")
            .bind(intent_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| {
                Ok(LegEventRow {
                    tenant_id: r.try_get("tenant_id")?,
                    intent_id: r.try_get("intent_id")?,
                    leg_id: r.try_get("leg_id")?,
                    event_type: r.try_get("event_type")?,
                    payload_json: r.try_get("payload_json")?,
                    ts: r.try_get("ts")?,
                })
            })
            .collect()
    }

    async fn audit_log(&self, record: &AuditRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into audit_log (
              id, action, resource_type, resource_id, book_id, severity,
              before_state, after_state, ts
            ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(record.id)
        .bind(&record.action)
        .bind(&record.resource_type)
        .bind(&record.resource_id)
        .bind(record.book_id)
        .bind(record.severity.as_str())
        .bind(&record.before_state)
        .bind(&record.after_state)
        .bind(record.ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditRecord>> {
        let rows = sqlx::query("select * from audit_log order by ts desc limit $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        let mut out: Vec<AuditRecord> = rows
            .iter()
            .map(|r| {
                let sev: String = r.try_get("severity")?;
                Ok(AuditRecord {
                    id: r.try_get("id")?,
                    action: r.try_get("action")?,
                    resource_type: r.try_get("resource_type")?,
                    resource_id: r.try_get("resource_id")?,
                    book_id: r.try_get("book_id")?,
                    severity: parse_severity(&sev)?,
                    before_state: r.try_get("before_state")?,
                    after_state: r.try_get("after_state")?,
                    ts: r.try_get("ts")?,
                })
            })
            .collect::<StoreResult<_>>()?;
        out.reverse();
        Ok(out)
    }

    async fn create_alert(&self, alert: &Alert) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into alerts (id, title, message, severity, source, metadata, created_at)
            values ($1,$2,$3,$4,$5,$6,$7)
            "#,
        )
        .bind(alert.id)
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(alert.severity.as_str())
        .bind(&alert.source)
        .bind(&alert.metadata)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_alerts(&self, limit: usize) -> StoreResult<Vec<Alert>> {
        let rows = sqlx::query("select * from alerts order by created_at desc limit $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        let mut out: Vec<Alert> = rows
            .iter()
            .map(|r| {
                let sev: String = r.try_get("severity")?;
                Ok(Alert {
                    id: r.try_get("id")?,
                    title: r.try_get("title")?,
                    message: r.try_get("message")?,
                    severity: parse_severity(&sev)?,
                    source: r.try_get("source")?,
                    metadata: r.try_get("metadata")?,
                    created_at: r.try_get("created_at")?,
                })
            })
            .collect::<StoreResult<_>>()?;
        out.reverse();
        Ok(out)
    }

    async fn kill_switch(&self, book_id: Option<Uuid>) -> StoreResult<Option<String>> {
        let row = sqlx::query(
            r#"
            select reason from kill_switches
            where active and (book_id is null or book_id = $1)
            order by book_id nulls first
            limit 1
            "#,
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Ok(r.try_get("reason")?)).transpose()
    }

    async fn set_kill_switch(
        &self,
        book_id: Option<Uuid>,
        active: bool,
        reason: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            insert into kill_switches (scope_key, book_id, active, reason, updated_at)
            values (coalesce($1::text, 'global'), $2, $3, $4, now())
            on conflict (scope_key) do update set
              active = excluded.active,
              reason = excluded.reason,
              updated_at = excluded.updated_at
            "#,
        )
        .bind(book_id.map(|b| b.to_string()))
        .bind(book_id)
        .bind(active)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
