use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::Side;

/// An open or closed venue-side position, created and updated on confirmed
/// fills. Closed (`is_open = false`) once the aggregated size reaches zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub book_id: Uuid,
    pub venue_id: Option<Uuid>,
    pub instrument: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub is_open: bool,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn open(
        book_id: Uuid,
        venue_id: Option<Uuid>,
        instrument: impl Into<String>,
        side: Side,
        size: f64,
        entry_price: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            book_id,
            venue_id,
            instrument: instrument.into(),
            side,
            size,
            entry_price,
            mark_price: entry_price,
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            is_open: true,
            updated_at: Utc::now(),
        }
    }

    /// Unrealised PnL at `mark`: longs gain as price rises, shorts as it
    /// falls.
    pub fn unrealized_at(&self, mark: f64) -> f64 {
        match self.side {
            Side::Buy => (mark - self.entry_price) * self.size,
            Side::Sell => (self.entry_price - mark) * self.size,
        }
    }
}
