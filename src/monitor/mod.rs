//! The monitor state machine
//!
//! Split into a pure decision core and an effectful driver: `decision` owns
//! every transition rule, `run` owns the clock, the corrective actions,
//! event emission, and persistence.

pub mod decision;
mod run;

pub use decision::{next_action, should_nudge_review, Action, HoldReason};
pub use run::Monitor;
