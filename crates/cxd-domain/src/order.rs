use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Side / OrderType / OrderStatus
// ---------------------------------------------------------------------------

/// Buy or sell, as carried by orders, intents, and execution legs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The opposite side, used when unwinding executed legs.
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Sign applied to exposure deltas: buys add, sells subtract.
    pub fn sign(self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
            OrderType::Stop => write!(f, "stop"),
        }
    }
}

/// Internal order lifecycle states.
///
/// `open → partial → filled | rejected | cancelled`, with `partial → filled |
/// cancelled` also legal. `rejected` and `cancelled` are terminal. Venue-side
/// statuses such as `expired` are observed by reconciliation and normalised
/// there; they never become internal states.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Partial,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Partial => "partial",
            OrderStatus::Filled => "filled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<OrderStatus> {
        match s {
            "open" => Some(OrderStatus::Open),
            "partial" => Some(OrderStatus::Partial),
            "filled" => Some(OrderStatus::Filled),
            "rejected" => Some(OrderStatus::Rejected),
            "cancelled" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// A single venue-side order. Created by the OMS, mutated only by the OMS.
///
/// Invariants (enforced by the OMS state machine):
/// - `filled_size <= size` at every observed state.
/// - `status == Filled` implies `filled_size == size` and `filled_price > 0`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub book_id: Uuid,
    pub strategy_id: Option<Uuid>,
    pub venue_id: Option<Uuid>,
    pub instrument: String,
    pub side: Side,
    pub size: f64,
    pub order_type: OrderType,
    pub price: Option<f64>,
    pub status: OrderStatus,
    pub filled_size: f64,
    pub filled_price: Option<f64>,
    /// Realised slippage in basis points, recorded by the adapter.
    pub slippage_bps: Option<f64>,
    pub latency_ms: Option<i64>,
    /// Venue-assigned identifier, populated once the order is acknowledged.
    pub venue_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Construct a new order in the `Open` state with no fills.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        book_id: Uuid,
        strategy_id: Option<Uuid>,
        venue_id: Option<Uuid>,
        instrument: impl Into<String>,
        side: Side,
        size: f64,
        order_type: OrderType,
        price: Option<f64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            book_id,
            strategy_id,
            venue_id,
            instrument: instrument.into(),
            side,
            size,
            order_type,
            price,
            status: OrderStatus::Open,
            filled_size: 0.0,
            filled_price: None,
            slippage_bps: None,
            latency_ms: None,
            venue_order_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `true` when the adapter reported a fill (full or partial) but the fill
    /// price is missing or non-positive. Such fills must never touch book
    /// exposure.
    pub fn has_invalid_fill_price(&self) -> bool {
        matches!(self.status, OrderStatus::Filled | OrderStatus::Partial)
            && self.filled_price.map_or(true, |p| p <= 0.0)
    }

    /// Signed notional of the filled portion: positive for buys, negative
    /// for sells. Zero when there is no valid fill.
    pub fn signed_fill_notional(&self) -> f64 {
        match self.filled_price {
            Some(p) if p > 0.0 => self.side.sign() * self.filled_size * p,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Order {
        Order::new(
            Uuid::new_v4(),
            None,
            None,
            "BTC-USD",
            Side::Buy,
            0.5,
            OrderType::Market,
            None,
        )
    }

    #[test]
    fn new_order_starts_open_and_unfilled() {
        let o = sample_order();
        assert_eq!(o.status, OrderStatus::Open);
        assert_eq!(o.filled_size, 0.0);
        assert!(!o.status.is_terminal());
    }

    #[test]
    fn filled_without_price_is_invalid() {
        let mut o = sample_order();
        o.status = OrderStatus::Filled;
        o.filled_size = 0.5;
        assert!(o.has_invalid_fill_price());
        o.filled_price = Some(0.0);
        assert!(o.has_invalid_fill_price());
        o.filled_price = Some(50_000.0);
        assert!(!o.has_invalid_fill_price());
    }

    #[test]
    fn signed_fill_notional_follows_side() {
        let mut o = sample_order();
        o.filled_size = 0.5;
        o.filled_price = Some(100.0);
        assert_eq!(o.signed_fill_notional(), 50.0);
        o.side = Side::Sell;
        assert_eq!(o.signed_fill_notional(), -50.0);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            OrderStatus::Open,
            OrderStatus::Partial,
            OrderStatus::Filled,
            OrderStatus::Rejected,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(OrderStatus::parse("expired"), None);
    }
}
