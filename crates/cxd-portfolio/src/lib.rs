//! Portfolio engine: the sole owner of book exposure and position rows.
//!
//! Books are mutated here on confirmed fills (exposure deltas are derived
//! scalars, never reverse-pointer walks). Positions aggregate per
//! `(book, instrument)`: same-side fills average the entry price, opposite
//! fills reduce and realise PnL, and a position flips sides when the
//! reducing fill exceeds the open size.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use cxd_domain::{Book, Order, Position, Side, TradeIntent};
use cxd_store::{Store, StoreResult};

pub const DEFAULT_TICK: f64 = 1e-6;

/// Round a size down to the venue tick.
pub fn round_down_to_tick(size: f64, tick: f64) -> f64 {
    if tick <= 0.0 || !size.is_finite() {
        return 0.0;
    }
    (size / tick).floor() * tick
}

/// Final position size for an intent: `target_exposure / entry`, floored to
/// tick. Zero when the entry price is unusable.
pub fn size_position(intent: &TradeIntent, expected_entry_price: f64, tick: f64) -> f64 {
    if expected_entry_price <= 0.0 || !expected_entry_price.is_finite() {
        return 0.0;
    }
    let raw = intent.target_exposure_usd / expected_entry_price;
    round_down_to_tick(raw.max(0.0), tick)
}

/// True when the intent reduces an existing open position on the same
/// instrument (opposite side).
pub fn is_reducing(intent: &TradeIntent, positions: &[Position]) -> bool {
    positions.iter().any(|p| {
        p.instrument.eq_ignore_ascii_case(&intent.instrument)
            && p.is_open
            && p.side != intent.direction
    })
}

/// Portfolio engine over the store.
#[derive(Clone)]
pub struct PortfolioEngine {
    store: Arc<dyn Store>,
}

impl PortfolioEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn get_book(&self, id: Uuid) -> StoreResult<Option<Book>> {
        self.store.fetch_book(id).await
    }

    pub async fn open_positions(&self, book_id: Uuid) -> StoreResult<Vec<Position>> {
        self.store.open_positions_for_book(book_id).await
    }

    /// Apply a signed exposure delta to a book. The only caller outside
    /// tests is the OMS after fill validation.
    pub async fn update_book_exposure(&self, book_id: Uuid, delta: f64) -> StoreResult<()> {
        self.store.apply_book_exposure_delta(book_id, delta).await
    }

    /// Book a confirmed fill into the position table.
    ///
    /// Caller guarantees `filled_size > 0` and `filled_price > 0` (the OMS
    /// fill validator). Returns the updated position row.
    pub async fn apply_fill(&self, order: &Order) -> StoreResult<Position> {
        let fill_size = order.filled_size;
        let fill_price = order.filled_price.unwrap_or(0.0);
        debug_assert!(fill_size > 0.0 && fill_price > 0.0);

        let open = self.store.open_positions_for_book(order.book_id).await?;
        let existing = open
            .into_iter()
            .find(|p| p.instrument.eq_ignore_ascii_case(&order.instrument));

        let mut position = match existing {
            None => {
                let p = Position::open(
                    order.book_id,
                    order.venue_id,
                    order.instrument.clone(),
                    order.side,
                    fill_size,
                    fill_price,
                );
                info!(
                    book_id = %order.book_id,
                    instrument = %order.instrument,
                    size = fill_size,
                    "position_opened"
                );
                p
            }
            Some(mut p) => {
                if p.side == order.side {
                    // Same side: grow, weighted-average the entry.
                    let total = p.size + fill_size;
                    p.entry_price =
                        (p.entry_price * p.size + fill_price * fill_size) / total;
                    p.size = total;
                } else {
                    // Opposite side: reduce and realise.
                    let closing = fill_size.min(p.size);
                    let realized = match p.side {
                        Side::Buy => (fill_price - p.entry_price) * closing,
                        Side::Sell => (p.entry_price - fill_price) * closing,
                    };
                    p.realized_pnl += realized;
                    p.size -= closing;

                    let overshoot = fill_size - closing;
                    if p.size <= 0.0 {
                        if overshoot > 0.0 {
                            // Flip: remainder opens the opposite side.
                            p.side = order.side;
                            p.size = overshoot;
                            p.entry_price = fill_price;
                        } else {
                            p.is_open = false;
                            p.size = 0.0;
                            info!(
                                book_id = %order.book_id,
                                instrument = %order.instrument,
                                realized,
                                "position_closed"
                            );
                        }
                    }
                }
                p
            }
        };

        position.mark_price = fill_price;
        position.unrealized_pnl = if position.is_open {
            position.unrealized_at(fill_price)
        } else {
            0.0
        };
        position.updated_at = Utc::now();

        self.store.upsert_position(&position).await?;
        Ok(position)
    }

    /// Re-mark open positions for a book against a price; persists the rows.
    pub async fn mark_positions(&self, book_id: Uuid, instrument: &str, mark: f64) -> StoreResult<()> {
        if mark <= 0.0 {
            warn!(instrument, mark, "mark_price_ignored");
            return Ok(());
        }
        let positions = self.store.open_positions_for_book(book_id).await?;
        for mut p in positions {
            if p.instrument.eq_ignore_ascii_case(instrument) {
                p.mark_price = mark;
                p.unrealized_pnl = p.unrealized_at(mark);
                p.updated_at = Utc::now();
                self.store.upsert_position(&p).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxd_domain::{OrderStatus, OrderType};
    use cxd_store::MemStore;

    fn filled_order(book_id: Uuid, side: Side, size: f64, price: f64) -> Order {
        let mut o = Order::new(
            book_id,
            None,
            None,
            "BTC-USD",
            side,
            size,
            OrderType::Market,
            None,
        );
        o.status = OrderStatus::Filled;
        o.filled_size = size;
        o.filled_price = Some(price);
        o
    }

    #[test]
    fn sizing_floors_to_tick() {
        let intent = TradeIntent::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "BTC-USD",
            Side::Buy,
            1_000.0,
            20.0,
            60,
            0.7,
        );
        let size = size_position(&intent, 30_000.0, 0.0001);
        assert_eq!(size, 0.0333);
        assert_eq!(size_position(&intent, 0.0, 0.0001), 0.0);
    }

    #[tokio::test]
    async fn same_side_fills_average_entry() {
        let store = Arc::new(MemStore::new());
        let engine = PortfolioEngine::new(store.clone());
        let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
        store.upsert_book(&book).await.unwrap();

        engine
            .apply_fill(&filled_order(book.id, Side::Buy, 1.0, 100.0))
            .await
            .unwrap();
        let p = engine
            .apply_fill(&filled_order(book.id, Side::Buy, 1.0, 200.0))
            .await
            .unwrap();

        assert_eq!(p.size, 2.0);
        assert_eq!(p.entry_price, 150.0);
        assert!(p.is_open);
    }

    #[tokio::test]
    async fn opposite_fill_realises_and_closes() {
        let store = Arc::new(MemStore::new());
        let engine = PortfolioEngine::new(store.clone());
        let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
        store.upsert_book(&book).await.unwrap();

        engine
            .apply_fill(&filled_order(book.id, Side::Buy, 1.0, 100.0))
            .await
            .unwrap();
        let p = engine
            .apply_fill(&filled_order(book.id, Side::Sell, 1.0, 120.0))
            .await
            .unwrap();

        assert!(!p.is_open);
        assert_eq!(p.size, 0.0);
        assert_eq!(p.realized_pnl, 20.0);
        assert!(engine.open_positions(book.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_reduce_flips_the_position() {
        let store = Arc::new(MemStore::new());
        let engine = PortfolioEngine::new(store.clone());
        let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
        store.upsert_book(&book).await.unwrap();

        engine
            .apply_fill(&filled_order(book.id, Side::Buy, 1.0, 100.0))
            .await
            .unwrap();
        let p = engine
            .apply_fill(&filled_order(book.id, Side::Sell, 1.5, 110.0))
            .await
            .unwrap();

        assert!(p.is_open);
        assert_eq!(p.side, Side::Sell);
        assert!((p.size - 0.5).abs() < 1e-12);
        assert_eq!(p.entry_price, 110.0);
        assert_eq!(p.realized_pnl, 10.0);
    }

    #[tokio::test]
    async fn reducing_check_requires_opposite_side() {
        let store = Arc::new(MemStore::new());
        let engine = PortfolioEngine::new(store.clone());
        let book = Book::new("alpha", "alpha", 100_000.0, 50_000.0);
        store.upsert_book(&book).await.unwrap();
        engine
            .apply_fill(&filled_order(book.id, Side::Buy, 1.0, 100.0))
            .await
            .unwrap();
        let positions = engine.open_positions(book.id).await.unwrap();

        let mut intent = TradeIntent::new(
            book.id,
            Uuid::new_v4(),
            "BTC-USD",
            Side::Sell,
            500.0,
            10.0,
            60,
            0.5,
        );
        assert!(is_reducing(&intent, &positions));
        intent.direction = Side::Buy;
        assert!(!is_reducing(&intent, &positions));
    }
}
