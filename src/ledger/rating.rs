//! Recording a rating together with its aggregate and wallet effects

use super::wallet;
use crate::config::RulesConfig;
use crate::error::{CoreResult, RoundError};
use crate::storage::Transaction;
use crate::types::{
    GlobalRound, HighRatingNotification, RatingAggregate, RatingEvent, RatingReceipt,
    RatingScope, RoundId, Score,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Writes ratings and everything that depends on them
#[derive(Debug, Clone)]
pub struct Ledger {
    rules: Arc<RulesConfig>,
}

impl Ledger {
    pub fn new(rules: Arc<RulesConfig>) -> Self {
        Self { rules }
    }

    /// Record one rating inside `tx`
    ///
    /// Validation, the uniqueness check, the event insert and the aggregate or
    /// wallet update all happen in the caller's transaction, so either all of
    /// them land or none do.
    pub fn record_rating(
        &self,
        tx: &mut Transaction<'_>,
        rater_id: &str,
        target_id: &str,
        score: Score,
        now: DateTime<Utc>,
    ) -> CoreResult<RatingReceipt> {
        score.validate()?;
        if rater_id == target_id {
            return Err(RoundError::SelfRating);
        }

        let rater = tx.require_profile(rater_id)?;
        let rater_name = rater.display_name.clone();
        let rater_photo = rater.photo.clone();
        let target_in_round = tx.require_profile(target_id)?.in_global_round;

        let scope = if target_in_round {
            let round = tx.current_round().ok_or(RoundError::NoActiveRound)?;
            RatingScope::Global(round.id)
        } else {
            RatingScope::Local
        };

        let duplicate = match scope {
            RatingScope::Local => has_local_vote(
                tx,
                rater_id,
                target_id,
                now - self.rules.local_uniqueness_window(),
            ),
            RatingScope::Global(round_id) => has_round_vote(tx, rater_id, target_id, round_id),
        };
        if duplicate {
            return Err(RoundError::DuplicateVote {
                rater_id: rater_id.to_string(),
                target_id: target_id.to_string(),
            });
        }

        let phase = match scope {
            RatingScope::Global(round_id) => tx.round(round_id).map(|round| round.phase),
            RatingScope::Local => None,
        };
        let event_id = tx.insert_rating_event(RatingEvent {
            id: 0,
            rater_id: rater_id.to_string(),
            target_id: target_id.to_string(),
            score,
            scope,
            phase,
            created_at: now,
        });

        let mut receipt = RatingReceipt {
            event_id,
            scope,
            phase,
            coins_awarded: 0,
            notification: None,
            threshold_reached: false,
        };

        let value = match score {
            Score::Rated(value) => value,
            Score::Skip => {
                debug!("{} skipped {} ({})", rater_id, target_id, scope.label());
                return Ok(receipt);
            }
        };

        match scope {
            RatingScope::Local => {
                let aggregate =
                    rolling_aggregate(tx, target_id, now, now - self.rules.rolling_window());
                tx.profile_mut(target_id)?.rating = aggregate;

                let reward = self.rules.high_rating_reward(value);
                if reward > 0 {
                    wallet::credit(tx, target_id, reward)?;
                    receipt.coins_awarded = reward;
                    receipt.notification = Some(HighRatingNotification {
                        event_id,
                        target_id: target_id.to_string(),
                        rater_id: rater_id.to_string(),
                        rater_name,
                        rater_photo,
                        score: value,
                        coins_awarded: reward,
                        timestamp: now,
                    });
                }
            }
            RatingScope::Global(round_id) => {
                tx.round_stat_mut(round_id, target_id).record(value);
                let round = tx
                    .round(round_id)
                    .ok_or(RoundError::RoundNotFound { round_id })?;
                let voters = distinct_phase_voters(tx, round);
                receipt.threshold_reached = voters >= self.rules.early_close_voter_threshold;
                if receipt.threshold_reached {
                    info!(
                        "Round {} reached {} distinct voters in {}",
                        round_id, voters, round.phase
                    );
                }
            }
        }

        Ok(receipt)
    }
}

/// Whether `rater_id` rated `target_id` locally at or after `since`
pub fn has_local_vote(
    tx: &Transaction<'_>,
    rater_id: &str,
    target_id: &str,
    since: DateTime<Utc>,
) -> bool {
    tx.rating_events_since(since).any(|event| {
        event.scope == RatingScope::Local
            && event.rater_id == rater_id
            && event.target_id == target_id
    })
}

/// Whether `rater_id` already voted for `target_id` in round `round_id`
pub fn has_round_vote(
    tx: &Transaction<'_>,
    rater_id: &str,
    target_id: &str,
    round_id: RoundId,
) -> bool {
    let Some(round) = tx.round(round_id) else {
        return false;
    };
    tx.rating_events_since(round.start_time).any(|event| {
        event.scope == RatingScope::Global(round_id)
            && event.rater_id == rater_id
            && event.target_id == target_id
    })
}

/// Local scores received by `target_id` at or after `since`
pub fn rolling_aggregate(
    tx: &Transaction<'_>,
    target_id: &str,
    now: DateTime<Utc>,
    since: DateTime<Utc>,
) -> RatingAggregate {
    let (sum, count) = tx
        .rating_events_since(since)
        .filter(|event| event.scope == RatingScope::Local && event.target_id == target_id)
        .filter_map(|event| event.score.value())
        .fold((0u64, 0u32), |(sum, count), value| {
            (sum + value as u64, count + 1)
        });
    RatingAggregate::from_window(sum, count, now)
}

/// Raters who cast a scored vote in the round's current phase
pub fn distinct_phase_voters(tx: &Transaction<'_>, round: &GlobalRound) -> usize {
    let phase_start = round
        .history
        .last()
        .map(|change| change.at)
        .unwrap_or(round.start_time);
    tx.rating_events_since(phase_start)
        .filter(|event| {
            event.scope == RatingScope::Global(round.id)
                && event.phase == Some(round.phase)
                && event.score.value().is_some()
        })
        .map(|event| event.rater_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;
    use crate::types::Profile;
    use chrono::Duration;

    fn setup() -> (InMemoryStore, Ledger) {
        let store = InMemoryStore::new();
        store
            .transaction(|tx| {
                tx.insert_profile(Profile::new("c", "Carol", 100).with_photo("carol.jpg"));
                tx.insert_profile(Profile::new("d", "Dave", 100));
                Ok(())
            })
            .unwrap();
        (store, Ledger::new(Arc::new(RulesConfig::default())))
    }

    #[test]
    fn test_local_high_rating_credits_target() {
        let (store, ledger) = setup();
        let now = Utc::now();

        let receipt = store
            .transaction(|tx| ledger.record_rating(tx, "c", "d", Score::Rated(8), now))
            .unwrap();
        assert_eq!(receipt.scope, RatingScope::Local);
        assert_eq!(receipt.coins_awarded, 2);
        let notification = receipt.notification.unwrap();
        assert_eq!(notification.rater_name, "Carol");
        assert_eq!(notification.rater_photo.as_deref(), Some("carol.jpg"));

        store
            .read(|tx| {
                let d = tx.require_profile("d")?;
                assert_eq!(d.balance, 102);
                assert_eq!(d.rating.count, 1);
                assert_eq!(d.rating.average, 8.0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_low_rating_has_no_reward() {
        let (store, ledger) = setup();
        let receipt = store
            .transaction(|tx| ledger.record_rating(tx, "c", "d", Score::Rated(6), Utc::now()))
            .unwrap();
        assert_eq!(receipt.coins_awarded, 0);
        assert!(receipt.notification.is_none());
    }

    #[test]
    fn test_self_rating_rejected() {
        let (store, ledger) = setup();
        let result =
            store.transaction(|tx| ledger.record_rating(tx, "c", "c", Score::Rated(9), Utc::now()));
        assert_eq!(result, Err(RoundError::SelfRating));
    }

    #[test]
    fn test_duplicate_within_window_leaves_aggregate_unchanged() {
        let (store, ledger) = setup();
        let now = Utc::now();
        store
            .transaction(|tx| ledger.record_rating(tx, "c", "d", Score::Rated(8), now))
            .unwrap();

        let later = now + Duration::minutes(59);
        let result =
            store.transaction(|tx| ledger.record_rating(tx, "c", "d", Score::Rated(10), later));
        assert!(matches!(result, Err(RoundError::DuplicateVote { .. })));

        store
            .read(|tx| {
                let d = tx.require_profile("d")?;
                assert_eq!(d.balance, 102);
                assert_eq!(d.rating.count, 1);
                assert_eq!(tx.rating_event_count(), 1);
                Ok(())
            })
            .unwrap();

        // Window over, the pair may rate again
        let much_later = now + Duration::minutes(61);
        assert!(store
            .transaction(|tx| ledger.record_rating(tx, "c", "d", Score::Rated(7), much_later))
            .is_ok());
    }

    #[test]
    fn test_flagged_target_without_round() {
        let (store, ledger) = setup();
        store
            .transaction(|tx| {
                tx.profile_mut("d")?.in_global_round = true;
                Ok(())
            })
            .unwrap();
        let result =
            store.transaction(|tx| ledger.record_rating(tx, "c", "d", Score::Rated(9), Utc::now()));
        assert_eq!(result, Err(RoundError::NoActiveRound));
    }

    #[test]
    fn test_skip_touches_nothing_but_blocks_repeat() {
        let (store, ledger) = setup();
        let now = Utc::now();
        let receipt = store
            .transaction(|tx| ledger.record_rating(tx, "c", "d", Score::Skip, now))
            .unwrap();
        assert_eq!(receipt.coins_awarded, 0);

        store
            .read(|tx| {
                let d = tx.require_profile("d")?;
                assert_eq!(d.balance, 100);
                assert_eq!(d.rating.count, 0);
                assert!(has_local_vote(tx, "c", "d", now - Duration::hours(1)));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_invalid_score() {
        let (store, ledger) = setup();
        let result =
            store.transaction(|tx| ledger.record_rating(tx, "c", "d", Score::Rated(0), Utc::now()));
        assert_eq!(result, Err(RoundError::InvalidScore { value: 0 }));
    }

    #[test]
    fn test_rolling_window_drops_old_scores() {
        let (store, ledger) = setup();
        let start = Utc::now();
        store
            .transaction(|tx| {
                tx.insert_profile(Profile::new("e", "Eve", 100));
                Ok(())
            })
            .unwrap();
        store
            .transaction(|tx| ledger.record_rating(tx, "c", "d", Score::Rated(4), start))
            .unwrap();
        let later = start + Duration::minutes(45);
        store
            .transaction(|tx| ledger.record_rating(tx, "e", "d", Score::Rated(10), later))
            .unwrap();

        store
            .read(|tx| {
                let d = tx.require_profile("d")?;
                assert_eq!(d.rating.count, 1);
                assert_eq!(d.rating.average, 10.0);
                Ok(())
            })
            .unwrap();
    }
}
