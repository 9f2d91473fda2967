use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One append-only audit row. Every state transition the engine performs
/// (order lifecycle, gate rejections, book status changes, reconciliation
/// actions, allocator decisions) writes one of these with before/after
/// evidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// snake_case action name, e.g. `order_filled`, `trade_blocked`.
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub book_id: Option<Uuid>,
    pub severity: Severity,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub ts: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            book_id: None,
            severity: Severity::Info,
            before_state: None,
            after_state: None,
            ts: Utc::now(),
        }
    }

    pub fn with_book(mut self, book_id: Uuid) -> Self {
        self.book_id = Some(book_id);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_before(mut self, state: Value) -> Self {
        self.before_state = Some(state);
        self
    }

    pub fn with_after(mut self, state: Value) -> Self {
        self.after_state = Some(state);
        self
    }
}

/// Operator-facing alert row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub title: String,
    pub message: String,
    pub severity: Severity,
    /// Component that raised the alert, e.g. `oms`, `reconciliation`.
    pub source: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            message: message.into(),
            severity,
            source: source.into(),
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}
