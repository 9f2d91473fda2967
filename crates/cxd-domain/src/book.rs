use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Book trading posture. Status changes are always audit-logged.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    Active,
    ReduceOnly,
    Halted,
}

impl BookStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookStatus::Active => "active",
            BookStatus::ReduceOnly => "reduce_only",
            BookStatus::Halted => "halted",
        }
    }

    pub fn parse(s: &str) -> Option<BookStatus> {
        match s {
            "active" => Some(BookStatus::Active),
            "reduce_only" => Some(BookStatus::ReduceOnly),
            "halted" => Some(BookStatus::Halted),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A trading account sub-unit with its own capital, risk limits and posture.
///
/// `current_exposure` is a derived scalar updated on confirmed fills by the
/// portfolio engine — never recomputed by walking positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: Uuid,
    pub name: String,
    /// Free-form book class, e.g. `"alpha"`, `"basis"`, `"arbitrage"`.
    pub book_type: String,
    pub capital_allocated: f64,
    pub current_exposure: f64,
    /// Hard cap on `current_exposure + new intent exposure`.
    pub max_exposure: f64,
    pub max_drawdown_limit: f64,
    pub status: BookStatus,
    pub updated_at: DateTime<Utc>,
}

impl Book {
    pub fn new(
        name: impl Into<String>,
        book_type: impl Into<String>,
        capital_allocated: f64,
        max_exposure: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            book_type: book_type.into(),
            capital_allocated,
            current_exposure: 0.0,
            max_exposure,
            max_drawdown_limit: 0.25,
            status: BookStatus::Active,
            updated_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == BookStatus::Active
    }
}
