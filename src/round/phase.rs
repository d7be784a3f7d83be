//! Pure phase rules for global rounds
//!
//! A round moves strictly through `Active → FinalVoting → RewardPhase → Closed`.
//! A closed round is never reopened; the next `Active` phase belongs to a new
//! round. Nothing here touches storage, so every rule can be checked with a
//! plain `GlobalRound` value and a timestamp.

use crate::error::{CoreResult, RoundError};
use crate::types::{GlobalRound, PhaseChange, RoundPhase};
use chrono::{DateTime, Utc};

/// Result of a deadline check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    /// The current phase has not expired
    NoTransition,
    /// The current phase expired and the round should move on
    Due(RoundPhase),
}

/// Phase that follows `phase` within one round
pub fn next_phase(phase: RoundPhase) -> Option<RoundPhase> {
    match phase {
        RoundPhase::Active => Some(RoundPhase::FinalVoting),
        RoundPhase::FinalVoting => Some(RoundPhase::RewardPhase),
        RoundPhase::RewardPhase => Some(RoundPhase::Closed),
        RoundPhase::Closed => None,
    }
}

pub fn can_transition(from: RoundPhase, to: RoundPhase) -> bool {
    next_phase(from) == Some(to)
}

/// Whether the round's current phase deadline has passed at `now`
pub fn check_transition(round: &GlobalRound, now: DateTime<Utc>) -> TransitionCheck {
    match round.current_deadline() {
        Some(deadline) if now >= deadline => match next_phase(round.phase) {
            Some(next) => TransitionCheck::Due(next),
            None => TransitionCheck::NoTransition,
        },
        _ => TransitionCheck::NoTransition,
    }
}

/// Move `round` to `to`, recording the change in its history
pub fn apply_transition(
    round: &mut GlobalRound,
    to: RoundPhase,
    at: DateTime<Utc>,
) -> CoreResult<RoundPhase> {
    if !can_transition(round.phase, to) {
        return Err(if round.phase == RoundPhase::Closed {
            RoundError::RoundAlreadyClosed { round_id: round.id }
        } else {
            RoundError::InvalidPhase {
                round_id: round.id,
                phase: round.phase,
            }
        });
    }
    let from = round.phase;
    round.phase = to;
    round.history.push(PhaseChange { phase: to, at });
    if to == RoundPhase::Closed {
        round.closed_at = Some(at);
    }
    Ok(from)
}

/// Whether the history follows the strict phase order from `Active`
pub fn history_is_ordered(round: &GlobalRound) -> bool {
    if round.history.first().map(|change| change.phase) != Some(RoundPhase::Active) {
        return false;
    }
    round
        .history
        .windows(2)
        .all(|pair| can_transition(pair[0].phase, pair[1].phase) && pair[0].at <= pair[1].at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn round_at(start: DateTime<Utc>) -> GlobalRound {
        GlobalRound {
            id: 1,
            start_time: start,
            rating_end_time: start + Duration::minutes(30),
            final_voting_end_time: start + Duration::minutes(40),
            phase: RoundPhase::Active,
            history: vec![PhaseChange {
                phase: RoundPhase::Active,
                at: start,
            }],
            finalists: Vec::new(),
            standings: Vec::new(),
            closed_at: None,
            next_round_id: None,
        }
    }

    #[test]
    fn test_phase_order() {
        assert_eq!(next_phase(RoundPhase::Active), Some(RoundPhase::FinalVoting));
        assert_eq!(
            next_phase(RoundPhase::FinalVoting),
            Some(RoundPhase::RewardPhase)
        );
        assert_eq!(next_phase(RoundPhase::RewardPhase), Some(RoundPhase::Closed));
        assert_eq!(next_phase(RoundPhase::Closed), None);
        assert!(!can_transition(RoundPhase::Active, RoundPhase::Closed));
        assert!(!can_transition(RoundPhase::FinalVoting, RoundPhase::Active));
    }

    #[test]
    fn test_deadline_checks() {
        let start = Utc::now();
        let mut round = round_at(start);

        assert_eq!(
            check_transition(&round, start + Duration::minutes(29)),
            TransitionCheck::NoTransition
        );
        assert_eq!(
            check_transition(&round, start + Duration::minutes(30)),
            TransitionCheck::Due(RoundPhase::FinalVoting)
        );

        apply_transition(&mut round, RoundPhase::FinalVoting, start + Duration::minutes(30))
            .unwrap();
        assert_eq!(
            check_transition(&round, start + Duration::minutes(35)),
            TransitionCheck::NoTransition
        );
        assert_eq!(
            check_transition(&round, start + Duration::minutes(40)),
            TransitionCheck::Due(RoundPhase::RewardPhase)
        );
    }

    #[test]
    fn test_full_walk_records_history() {
        let start = Utc::now();
        let mut round = round_at(start);
        let mut at = start;
        for phase in [
            RoundPhase::FinalVoting,
            RoundPhase::RewardPhase,
            RoundPhase::Closed,
        ] {
            at += Duration::minutes(1);
            apply_transition(&mut round, phase, at).unwrap();
        }
        assert_eq!(round.closed_at, Some(at));
        assert_eq!(round.history.len(), 4);
        assert!(history_is_ordered(&round));
        assert_eq!(
            check_transition(&round, at + Duration::days(1)),
            TransitionCheck::NoTransition
        );
    }

    #[test]
    fn test_skipping_is_refused() {
        let start = Utc::now();
        let mut round = round_at(start);
        assert_eq!(
            apply_transition(&mut round, RoundPhase::RewardPhase, start),
            Err(RoundError::InvalidPhase {
                round_id: 1,
                phase: RoundPhase::Active
            })
        );
        assert_eq!(round.phase, RoundPhase::Active);
        assert_eq!(round.history.len(), 1);
    }

    #[test]
    fn test_closed_round_cannot_move() {
        let start = Utc::now();
        let mut round = round_at(start);
        round.phase = RoundPhase::Closed;
        assert_eq!(
            apply_transition(&mut round, RoundPhase::Active, start),
            Err(RoundError::RoundAlreadyClosed { round_id: 1 })
        );
    }
}
