//! Common types used throughout the rating engine

use crate::error::{CoreResult, RoundError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier of a profile (the chat user id)
pub type ProfileId = String;

/// Sequential identifier of a global round
pub type RoundId = u64;

/// Virtual currency amount; wallets can never go below zero
pub type Coins = u64;

/// A score given by a rater, or a skip marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    Rated(u8),
    Skip,
}

impl Score {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    /// Build a validated score in the 1..=10 range
    pub fn rated(value: u8) -> CoreResult<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Score::Rated(value))
        } else {
            Err(RoundError::InvalidScore { value })
        }
    }

    /// Numeric value, `None` for skips
    pub fn value(&self) -> Option<u8> {
        match self {
            Score::Rated(value) => Some(*value),
            Score::Skip => None,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        match self {
            Score::Rated(value) => Score::rated(*value).map(|_| ()),
            Score::Skip => Ok(()),
        }
    }
}

/// Rolling rating aggregate of a profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingAggregate {
    pub average: f64,
    pub count: u32,
    pub sum: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl RatingAggregate {
    pub fn from_window(sum: u64, count: u32, now: DateTime<Utc>) -> Self {
        Self {
            average: crate::utils::average(sum, count),
            count,
            sum,
            updated_at: Some(now),
        }
    }
}

/// Profile record as seen by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub display_name: String,
    pub photo: Option<String>,
    pub balance: Coins,
    pub rating: RatingAggregate,
    pub last_local_win_time: Option<DateTime<Utc>>,
    pub last_global_win_time: Option<DateTime<Utc>>,
    pub in_global_round: bool,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn new(id: impl Into<ProfileId>, display_name: impl Into<String>, balance: Coins) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            photo: None,
            balance,
            rating: RatingAggregate::default(),
            last_local_win_time: None,
            last_global_win_time: None,
            in_global_round: false,
            created_at: crate::utils::current_timestamp(),
        }
    }

    pub fn with_photo(mut self, photo: impl Into<String>) -> Self {
        self.photo = Some(photo.into());
        self
    }
}

/// Whether a rating counts towards the casual aggregate or a global round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "round_id")]
pub enum RatingScope {
    Local,
    Global(RoundId),
}

impl RatingScope {
    pub fn label(&self) -> &'static str {
        match self {
            RatingScope::Local => "local",
            RatingScope::Global(_) => "global",
        }
    }
}

/// Immutable record of one rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingEvent {
    pub id: u64,
    pub rater_id: ProfileId,
    pub target_id: ProfileId,
    pub score: Score,
    pub scope: RatingScope,
    /// Round phase the vote was cast in, for global votes
    pub phase: Option<RoundPhase>,
    pub created_at: DateTime<Utc>,
}

/// Phases of a global round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    Active,
    FinalVoting,
    RewardPhase,
    Closed,
}

impl RoundPhase {
    /// Whether ratings are accepted in this phase
    pub fn accepts_votes(&self) -> bool {
        matches!(self, RoundPhase::Active | RoundPhase::FinalVoting)
    }

    pub fn label(&self) -> &'static str {
        match self {
            RoundPhase::Active => "active",
            RoundPhase::FinalVoting => "final_voting",
            RoundPhase::RewardPhase => "reward_phase",
            RoundPhase::Closed => "closed",
        }
    }
}

impl std::fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One entry of a round's phase history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub phase: RoundPhase,
    pub at: DateTime<Utc>,
}

/// A time-boxed competitive rating round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalRound {
    pub id: RoundId,
    pub start_time: DateTime<Utc>,
    pub rating_end_time: DateTime<Utc>,
    pub final_voting_end_time: DateTime<Utc>,
    pub phase: RoundPhase,
    pub history: Vec<PhaseChange>,
    /// Profiles selected for final voting
    pub finalists: Vec<ProfileId>,
    /// Final standings, filled in when the round closes
    pub standings: Vec<Placement>,
    pub closed_at: Option<DateTime<Utc>>,
    /// Round opened when this one closed
    #[serde(default)]
    pub next_round_id: Option<RoundId>,
}

impl GlobalRound {
    /// Deadline of the phase the round is currently in
    pub fn current_deadline(&self) -> Option<DateTime<Utc>> {
        match self.phase {
            RoundPhase::Active => Some(self.rating_end_time),
            RoundPhase::FinalVoting => Some(self.final_voting_end_time),
            RoundPhase::RewardPhase | RoundPhase::Closed => None,
        }
    }
}

/// Per (round, profile) vote aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundStat {
    pub round_id: RoundId,
    pub profile_id: ProfileId,
    pub vote_count: u32,
    pub rating_sum: u64,
}

impl RoundStat {
    pub fn new(round_id: RoundId, profile_id: ProfileId) -> Self {
        Self {
            round_id,
            profile_id,
            vote_count: 0,
            rating_sum: 0,
        }
    }

    pub fn record(&mut self, score: u8) {
        self.vote_count += 1;
        self.rating_sum += score as u64;
    }

    pub fn average(&self) -> f64 {
        crate::utils::average(self.rating_sum, self.vote_count)
    }
}

/// Append-only audit entry of a payout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerRecord {
    pub id: u64,
    pub profile_id: ProfileId,
    pub place: u32,
    pub coins_awarded: Coins,
    pub round_end_time: DateTime<Utc>,
    pub is_global: bool,
    pub round_id: Option<RoundId>,
}

/// A ranked position with its reward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub profile_id: ProfileId,
    pub place: u32,
    pub reward: Coins,
    pub average: f64,
    pub vote_count: u32,
}

/// Payload forwarded to a target who received a high score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighRatingNotification {
    /// Id of the rating event that earned the reward
    pub event_id: u64,
    pub target_id: ProfileId,
    pub rater_id: ProfileId,
    pub rater_name: String,
    pub rater_photo: Option<String>,
    pub score: u8,
    pub coins_awarded: Coins,
    pub timestamp: DateTime<Utc>,
}

/// Result of a successful `record_rating`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingReceipt {
    pub event_id: u64,
    pub scope: RatingScope,
    /// Phase of the round the vote counted towards
    pub phase: Option<RoundPhase>,
    pub coins_awarded: Coins,
    pub notification: Option<HighRatingNotification>,
    /// The round crossed its distinct-voter threshold with this vote
    pub threshold_reached: bool,
}

/// Result of a successful `join_global_round`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinReceipt {
    pub round_id: RoundId,
    pub balance: Coins,
    pub entry_fee: Coins,
    pub round_created: bool,
    pub rating_end_time: DateTime<Utc>,
}

/// Snapshot of the current round for the chat interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStatus {
    pub round_id: Option<RoundId>,
    /// `None` when no round is running
    pub phase: Option<RoundPhase>,
    pub time_remaining_seconds: Option<i64>,
    pub participants: usize,
    pub finalists: Vec<ProfileId>,
}

impl RoundStatus {
    pub fn inactive() -> Self {
        Self {
            round_id: None,
            phase: None,
            time_remaining_seconds: None,
            participants: 0,
            finalists: Vec::new(),
        }
    }

    pub fn is_inactive(&self) -> bool {
        self.phase.is_none()
    }
}

/// Event emitted when a round changes phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundPhaseChanged {
    pub round_id: RoundId,
    pub from: Option<RoundPhase>,
    pub to: RoundPhase,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a round is settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResults {
    pub round_id: RoundId,
    pub standings: Vec<Placement>,
    pub closed_at: DateTime<Utc>,
}

/// Event emitted after a local-winner sweep paid out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalWinners {
    pub winners: Vec<WinnerRecord>,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all outbound messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundEvent {
    HighRating(HighRatingNotification),
    RoundPhaseChanged(RoundPhaseChanged),
    RoundResults(RoundResults),
    LocalWinners(LocalWinners),
}
