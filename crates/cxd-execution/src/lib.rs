//! Execution layer: order state machine, execution planner, and the OMS.
//!
//! The OMS is the single writer of order and fill state. Everything that
//! becomes an order flows through [`Oms::execute_intent`]'s gate pipeline:
//!
//! ```text
//! kill_switch → book_gate → venue_health → risk_gate → cost_gate
//!   → size_positions → resolve_plan
//!   → (legged execution | single leg)
//!   → validate_fill → update_book_exposure → persist_order
//! ```

pub mod oms;
pub mod planner;
pub mod state_machine;

pub use oms::{Oms, OmsConfig};
pub use planner::ExecutionPlanner;
pub use state_machine::{transition_action, validate_transition, TransitionError};
