//! Error types for the rating engine
//!
//! Domain outcomes (self-rating, duplicate votes, insufficient balance, ...) are
//! modelled by [`RoundError`] and returned by every core operation. Service and
//! infrastructure code keeps using anyhow for consistent error handling.

use crate::types::{ProfileId, RoundId, RoundPhase};

/// Result type alias for service and infrastructure code
pub type Result<T> = anyhow::Result<T>;

/// Result type alias for core engine operations
pub type CoreResult<T> = std::result::Result<T, RoundError>;

/// Typed outcomes of core operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundError {
    #[error("Profiles cannot rate themselves")]
    SelfRating,

    #[error("Profile {rater_id} already rated {target_id} in the current window")]
    DuplicateVote {
        rater_id: ProfileId,
        target_id: ProfileId,
    },

    #[error("No global round is accepting votes")]
    NoActiveRound,

    #[error("Insufficient balance: {required} coins required, {available} available")]
    InsufficientBalance { required: u64, available: u64 },

    #[error("Cooldown active for another {remaining_seconds}s")]
    CooldownActive { remaining_seconds: i64 },

    #[error("Round {round_id} is already closed")]
    RoundAlreadyClosed { round_id: RoundId },

    #[error("Profile {profile_id} is already enrolled in the current round")]
    AlreadyEnrolled { profile_id: ProfileId },

    #[error("Round {round_id} is in final voting and no longer accepts entries")]
    EntriesFrozen { round_id: RoundId },

    #[error("Invalid score {value}: must be between 1 and 10")]
    InvalidScore { value: u8 },

    #[error("Profile not found: {profile_id}")]
    ProfileNotFound { profile_id: ProfileId },

    #[error("Round not found: {round_id}")]
    RoundNotFound { round_id: RoundId },

    #[error("Round {round_id} cannot do that while in phase {phase:?}")]
    InvalidPhase { round_id: RoundId, phase: RoundPhase },

    #[error("Too many requests from {profile_id}, slow down")]
    RateLimited { profile_id: ProfileId },

    #[error("Storage failure: {message}")]
    Storage { message: String },
}

impl RoundError {
    /// Whether this is an expected domain outcome rather than a transient failure
    pub fn is_rejection(&self) -> bool {
        !matches!(self, RoundError::Storage { .. })
    }

    /// Stable machine-readable code for the chat interface
    pub fn code(&self) -> &'static str {
        match self {
            RoundError::SelfRating => "self_rating",
            RoundError::DuplicateVote { .. } => "duplicate_vote",
            RoundError::NoActiveRound => "no_active_round",
            RoundError::InsufficientBalance { .. } => "insufficient_balance",
            RoundError::CooldownActive { .. } => "cooldown_active",
            RoundError::RoundAlreadyClosed { .. } => "round_already_closed",
            RoundError::AlreadyEnrolled { .. } => "already_enrolled",
            RoundError::EntriesFrozen { .. } => "entries_frozen",
            RoundError::InvalidScore { .. } => "invalid_score",
            RoundError::ProfileNotFound { .. } => "profile_not_found",
            RoundError::RoundNotFound { .. } => "round_not_found",
            RoundError::InvalidPhase { .. } => "invalid_phase",
            RoundError::RateLimited { .. } => "rate_limited",
            RoundError::Storage { .. } => "transient_failure",
        }
    }

    pub(crate) fn storage(message: impl Into<String>) -> Self {
        RoundError::Storage {
            message: message.into(),
        }
    }
}
