//! Atomic rating records and coin balance mutations
//!
//! The ledger owns the write path for ratings: uniqueness checks, event
//! insertion, rolling aggregates, round stats and high-rating credits.

pub mod rating;
pub mod wallet;

pub use rating::{distinct_phase_voters, has_local_vote, has_round_vote, rolling_aggregate, Ledger};
pub use wallet::{credit, debit};
