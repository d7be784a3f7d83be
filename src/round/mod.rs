//! Global round state machine
//!
//! `phase` holds the pure ordering and deadline rules; `machine` applies them
//! to stored rounds inside a transaction.

pub mod machine;
pub mod phase;

pub use machine::{RoundAdvance, RoundStateMachine};
pub use phase::{can_transition, check_transition, next_phase, TransitionCheck};
