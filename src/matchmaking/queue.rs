//! Next-profile selection
//!
//! Candidates are split into two tiers: profiles enrolled in the running global
//! round are served before everyone else. Inside a tier the pick is uniformly
//! random and re-drawn on every call.

use crate::config::RulesConfig;
use crate::error::CoreResult;
use crate::storage::{InMemoryStore, Transaction};
use crate::types::{Profile, RatingScope};
use crate::utils::within_window;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Candidates for one rater, split by priority
#[derive(Debug, Default)]
pub struct CandidateTiers<'t> {
    pub global: Vec<&'t Profile>,
    pub local: Vec<&'t Profile>,
}

impl<'t> CandidateTiers<'t> {
    pub fn is_empty(&self) -> bool {
        self.global.is_empty() && self.local.is_empty()
    }

    pub fn len(&self) -> usize {
        self.global.len() + self.local.len()
    }

    /// Random pick from the highest non-empty tier
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&'t Profile> {
        if self.global.is_empty() {
            self.local.choose(rng).copied()
        } else {
            self.global.choose(rng).copied()
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchmakingQueue {
    rules: Arc<RulesConfig>,
}

impl MatchmakingQueue {
    pub fn new(rules: Arc<RulesConfig>) -> Self {
        Self { rules }
    }

    /// Next profile to show `rater_id`, `None` when nothing is eligible
    pub fn next_profile(
        &self,
        store: &InMemoryStore,
        rater_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<Profile>> {
        self.next_profile_with(store, rater_id, now, &mut rand::thread_rng())
    }

    pub fn next_profile_with<R: Rng + ?Sized>(
        &self,
        store: &InMemoryStore,
        rater_id: &str,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> CoreResult<Option<Profile>> {
        store.read(|tx| {
            tx.require_profile(rater_id)?;
            let tiers = self.candidates(tx, rater_id, now);
            let picked = tiers.choose(rng).cloned();
            debug!(
                "Matchmaking for {}: {} global, {} local candidates, picked {:?}",
                rater_id,
                tiers.global.len(),
                tiers.local.len(),
                picked.as_ref().map(|profile| profile.id.as_str())
            );
            Ok(picked)
        })
    }

    /// Every profile `rater_id` may be shown right now
    pub fn candidates<'t>(
        &self,
        tx: &'t Transaction<'_>,
        rater_id: &str,
        now: DateTime<Utc>,
    ) -> CandidateTiers<'t> {
        let round = tx.current_round();
        let local_cutoff = now - self.rules.local_uniqueness_window();
        let scan_from = match round {
            Some(round) if round.start_time < local_cutoff => round.start_time,
            _ => local_cutoff,
        };

        let already_rated: HashSet<&str> = tx
            .rating_events_since(scan_from)
            .filter(|event| event.rater_id == rater_id)
            .filter(|event| match event.scope {
                RatingScope::Local => event.created_at >= local_cutoff,
                RatingScope::Global(round_id) => round.map(|r| r.id) == Some(round_id),
            })
            .map(|event| event.target_id.as_str())
            .collect();

        let hide = self.rules.matchmaking_hide();
        let mut tiers = CandidateTiers::default();
        for profile in tx.profiles() {
            if profile.id == rater_id
                || already_rated.contains(profile.id.as_str())
                || within_window(profile.last_local_win_time, now, hide)
            {
                continue;
            }
            match (profile.in_global_round, round) {
                (true, Some(_)) => tiers.global.push(profile),
                // Flagged without a running round: any rating would be refused
                (true, None) => {}
                (false, _) => tiers.local.push(profile),
            }
        }
        tiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use crate::types::Score;
    use chrono::Duration;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup(ids: &[&str]) -> (InMemoryStore, MatchmakingQueue, Ledger) {
        let store = InMemoryStore::new();
        store
            .transaction(|tx| {
                for id in ids {
                    tx.insert_profile(Profile::new(*id, id.to_uppercase(), 100));
                }
                Ok(())
            })
            .unwrap();
        let rules = Arc::new(RulesConfig::default());
        (
            store,
            MatchmakingQueue::new(rules.clone()),
            Ledger::new(rules),
        )
    }

    #[test]
    fn test_never_returns_self() {
        let (store, queue, _) = setup(&["a"]);
        let next = queue.next_profile(&store, "a", Utc::now()).unwrap();
        assert!(next.is_none());
    }

    #[test]
    fn test_unknown_rater() {
        let (store, queue, _) = setup(&["a"]);
        assert!(queue.next_profile(&store, "ghost", Utc::now()).is_err());
    }

    #[test]
    fn test_rated_targets_are_excluded_for_the_window() {
        let (store, queue, ledger) = setup(&["a", "b", "c"]);
        let now = Utc::now();
        store
            .transaction(|tx| ledger.record_rating(tx, "a", "b", Score::Rated(5), now))
            .unwrap();

        for _ in 0..20 {
            let next = queue.next_profile(&store, "a", now).unwrap().unwrap();
            assert_eq!(next.id, "c");
        }

        let later = now + Duration::minutes(61);
        let ids: HashSet<String> = (0..50)
            .filter_map(|_| queue.next_profile(&store, "a", later).unwrap())
            .map(|profile| profile.id)
            .collect();
        assert!(ids.contains("b"));
    }

    #[test]
    fn test_recent_local_winner_hidden() {
        let (store, queue, _) = setup(&["a", "b"]);
        let now = Utc::now();
        store
            .transaction(|tx| {
                tx.profile_mut("b")?.last_local_win_time = Some(now - Duration::minutes(30));
                Ok(())
            })
            .unwrap();
        assert!(queue.next_profile(&store, "a", now).unwrap().is_none());
        assert!(queue
            .next_profile(&store, "a", now + Duration::minutes(31))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_global_tier_served_first() {
        let (store, queue, _) = setup(&["a", "b", "c", "d"]);
        let now = Utc::now();
        store
            .transaction(|tx| {
                tx.create_round(now, now + Duration::minutes(30), now + Duration::minutes(40));
                tx.profile_mut("c")?.in_global_round = true;
                Ok(())
            })
            .unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let next = queue
                .next_profile_with(&store, "a", now, &mut rng)
                .unwrap()
                .unwrap();
            assert_eq!(next.id, "c");
        }
    }

    #[test]
    fn test_flagged_without_round_is_skipped() {
        let (store, queue, _) = setup(&["a", "b"]);
        store
            .transaction(|tx| {
                tx.profile_mut("b")?.in_global_round = true;
                Ok(())
            })
            .unwrap();
        assert!(queue.next_profile(&store, "a", Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_random_within_tier() {
        let (store, queue, _) = setup(&["a", "b", "c", "d", "e"]);
        let now = Utc::now();
        let seen: HashSet<String> = (0..200)
            .filter_map(|_| queue.next_profile(&store, "a", now).unwrap())
            .map(|profile| profile.id)
            .collect();
        assert_eq!(seen.len(), 4);
        assert!(!seen.contains("a"));
    }
}
