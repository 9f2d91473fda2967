//! Venue order-status normalisation.
//!
//! Venues word their lifecycle states differently (`new`, `done`,
//! `partially filled`, `expired`, ...). Comparison happens through a
//! canonical bucket per internal status. `expired` is deliberately NOT an
//! internal state: it is observed here and folded into the cancelled bucket
//! for comparison only.

use cxd_domain::OrderStatus;

/// Canonical bucket for a raw venue status string, if recognised.
pub fn normalize_venue_status(raw: &str) -> Option<OrderStatus> {
    let lowered = raw.trim().to_lowercase();
    match lowered.as_str() {
        "new" | "pending" | "open" | "active" => Some(OrderStatus::Open),
        "partially_filled" | "partial" | "partially filled" => Some(OrderStatus::Partial),
        "filled" | "closed" | "done" | "executed" => Some(OrderStatus::Filled),
        "cancelled" | "canceled" | "expired" => Some(OrderStatus::Cancelled),
        "rejected" => Some(OrderStatus::Rejected),
        _ => None,
    }
}

/// Whether an internal status and a raw venue status fall into the same
/// bucket. Unknown venue statuses only match on literal equality.
pub fn status_matches(internal: &str, venue: &str) -> bool {
    let internal_status = OrderStatus::parse(&internal.to_lowercase());
    let venue_status = normalize_venue_status(venue);
    match (internal_status, venue_status) {
        (Some(a), Some(b)) => {
            // Rejected and cancelled share a comparison bucket: both mean
            // "this order will never fill further".
            let bucket = |s: OrderStatus| match s {
                OrderStatus::Rejected => OrderStatus::Cancelled,
                other => other,
            };
            bucket(a) == bucket(b)
        }
        _ => internal.eq_ignore_ascii_case(venue),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_wordings_collapse_to_buckets() {
        assert_eq!(normalize_venue_status("NEW"), Some(OrderStatus::Open));
        assert_eq!(normalize_venue_status("done"), Some(OrderStatus::Filled));
        assert_eq!(
            normalize_venue_status("partially filled"),
            Some(OrderStatus::Partial)
        );
        assert_eq!(normalize_venue_status("canceled"), Some(OrderStatus::Cancelled));
        assert_eq!(normalize_venue_status("whatever"), None);
    }

    #[test]
    fn expired_maps_to_cancelled_bucket_only_here() {
        // `expired` never becomes an internal state; it compares equal to
        // cancelled at the reconciliation boundary.
        assert_eq!(normalize_venue_status("expired"), Some(OrderStatus::Cancelled));
        assert!(status_matches("cancelled", "expired"));
        assert!(!status_matches("open", "expired"));
    }

    #[test]
    fn matching_is_bucket_based() {
        assert!(status_matches("open", "new"));
        assert!(status_matches("open", "active"));
        assert!(status_matches("partial", "partially_filled"));
        assert!(status_matches("filled", "done"));
        assert!(!status_matches("open", "done"));
        assert!(!status_matches("filled", "new"));
    }

    #[test]
    fn rejected_and_cancelled_share_a_bucket() {
        assert!(status_matches("rejected", "cancelled"));
        assert!(status_matches("cancelled", "rejected"));
    }

    #[test]
    fn unknown_statuses_fall_back_to_literal_match() {
        assert!(status_matches("weird_state", "WEIRD_STATE"));
        assert!(!status_matches("weird_state", "other_state"));
    }
}
