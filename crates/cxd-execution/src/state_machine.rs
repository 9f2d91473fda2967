//! Order lifecycle state machine.
//!
//! ```text
//!            ┌───────────► Filled (terminal)
//!            │
//!   Open ────┼───► Partial ───► Filled (terminal)
//!            │        │
//!            │        └───────► Cancelled (terminal)
//!            ├───────────► Rejected (terminal)
//!            └───────────► Cancelled (terminal)
//! ```
//!
//! Every legal transition has an audit action name; an illegal transition is
//! a [`TransitionError`], which callers MUST treat as an OMS inconsistency
//! requiring operator attention (e.g. a fill arriving on a cancelled order).
//! `partial` followed by `filled` are distinct events and each produces its
//! own audit record.

use cxd_domain::OrderStatus;

/// Returned when a status change is not a legal lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal order transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for TransitionError {}

/// Validate a status change. Self-transitions are legal no-ops for
/// non-terminal states (idempotent adapter echoes).
pub fn validate_transition(from: OrderStatus, to: OrderStatus) -> Result<(), TransitionError> {
    use OrderStatus::*;

    let legal = match (from, to) {
        // Idempotent echoes while live.
        (Open, Open) | (Partial, Partial) => true,
        (Open, Partial) | (Open, Filled) | (Open, Rejected) | (Open, Cancelled) => true,
        (Partial, Filled) | (Partial, Cancelled) => true,
        // Terminal states accept nothing.
        _ => false,
    };

    if legal {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// Audit action name for an applied transition.
pub fn transition_action(to: OrderStatus) -> &'static str {
    match to {
        OrderStatus::Open => "order_opened",
        OrderStatus::Partial => "order_partial",
        OrderStatus::Filled => "order_filled",
        OrderStatus::Rejected => "order_rejected",
        OrderStatus::Cancelled => "order_cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use OrderStatus::*;

    #[test]
    fn open_reaches_every_state() {
        for to in [Partial, Filled, Rejected, Cancelled] {
            validate_transition(Open, to).unwrap();
        }
    }

    #[test]
    fn partial_reaches_filled_and_cancelled_only() {
        validate_transition(Partial, Filled).unwrap();
        validate_transition(Partial, Cancelled).unwrap();
        assert!(validate_transition(Partial, Rejected).is_err());
        assert!(validate_transition(Partial, Open).is_err());
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for from in [Filled, Rejected, Cancelled] {
            for to in [Open, Partial, Filled, Rejected, Cancelled] {
                assert!(
                    validate_transition(from, to).is_err(),
                    "{from} -> {to} must be illegal"
                );
            }
        }
    }

    #[test]
    fn live_echoes_are_idempotent() {
        validate_transition(Open, Open).unwrap();
        validate_transition(Partial, Partial).unwrap();
    }

    #[test]
    fn error_carries_both_states() {
        let err = validate_transition(Filled, Cancelled).unwrap_err();
        assert_eq!(err.from, Filled);
        assert_eq!(err.to, Cancelled);
        assert!(err.to_string().contains("filled -> cancelled"));
    }
}
