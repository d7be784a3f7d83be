//! Selection of the next profile to present to a rater

pub mod queue;

pub use queue::{CandidateTiers, MatchmakingQueue};
