//! Global round lifecycle: entry, deadline-driven transitions and status

use super::phase::{apply_transition, check_transition, TransitionCheck};
use crate::config::RulesConfig;
use crate::error::{CoreResult, RoundError};
use crate::ledger::wallet;
use crate::storage::Transaction;
use crate::types::{JoinReceipt, ProfileId, RoundId, RoundPhase, RoundStatus};
use crate::utils::seconds_until;
use crate::winners::ranking::{rank, Standing};
use crate::winners::resolver::{Settlement, WinnerResolver};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// What a call to [`RoundStateMachine::advance`] did
#[derive(Debug, Clone, PartialEq)]
pub enum RoundAdvance {
    /// The round was already past the requested step
    Unchanged { round_id: RoundId },
    /// Entries frozen and the top profiles kept as finalists
    FinalVotingStarted {
        round_id: RoundId,
        finalists: Vec<ProfileId>,
        dropped: Vec<ProfileId>,
    },
    /// Rewards paid, round closed and its successor opened
    Settled(Settlement),
}

/// Drives a round through its phases
#[derive(Debug, Clone)]
pub struct RoundStateMachine {
    rules: Arc<RulesConfig>,
    resolver: WinnerResolver,
}

impl RoundStateMachine {
    pub fn new(rules: Arc<RulesConfig>) -> Self {
        Self {
            resolver: WinnerResolver::new(rules.clone()),
            rules,
        }
    }

    pub fn resolver(&self) -> &WinnerResolver {
        &self.resolver
    }

    /// Pay the entry fee and enrol the profile, opening a round when none runs
    pub fn join(
        &self,
        tx: &mut Transaction<'_>,
        profile_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<JoinReceipt> {
        let profile = tx.require_profile(profile_id)?;
        let current = tx.current_round().map(|round| (round.id, round.phase));

        if profile.in_global_round && current.is_some() {
            return Err(RoundError::AlreadyEnrolled {
                profile_id: profile_id.to_string(),
            });
        }

        if let Some(won_at) = profile.last_global_win_time {
            let cooldown_end = won_at + self.rules.global_win_cooldown();
            if now < cooldown_end {
                return Err(RoundError::CooldownActive {
                    remaining_seconds: seconds_until(cooldown_end, now),
                });
            }
        }

        let (round_id, round_created) = match current {
            Some((round_id, RoundPhase::Active)) => (round_id, false),
            Some((round_id, _)) => return Err(RoundError::EntriesFrozen { round_id }),
            None => (open_round(tx, &self.rules, now), true),
        };

        let balance = wallet::debit(tx, profile_id, self.rules.entry_fee)?;
        tx.profile_mut(profile_id)?.in_global_round = true;
        tx.round_stat_mut(round_id, profile_id);

        let rating_end_time = tx
            .round(round_id)
            .map(|round| round.rating_end_time)
            .ok_or(RoundError::RoundNotFound { round_id })?;

        info!(
            "Profile {} joined round {} (balance {})",
            profile_id, round_id, balance
        );

        Ok(JoinReceipt {
            round_id,
            balance,
            entry_fee: self.rules.entry_fee,
            round_created,
            rating_end_time,
        })
    }

    /// Move `round_id` one step forward regardless of its deadline
    ///
    /// Used by the early trigger and by [`Self::tick`]. A closed round is left
    /// untouched.
    pub fn advance(
        &self,
        tx: &mut Transaction<'_>,
        round_id: RoundId,
        now: DateTime<Utc>,
    ) -> CoreResult<RoundAdvance> {
        let phase = tx
            .round(round_id)
            .map(|round| round.phase)
            .ok_or(RoundError::RoundNotFound { round_id })?;

        match phase {
            RoundPhase::Active => self.enter_final_voting(tx, round_id, now),
            RoundPhase::FinalVoting | RoundPhase::RewardPhase => self
                .resolver
                .settle(tx, round_id, now)
                .map(RoundAdvance::Settled),
            RoundPhase::Closed => {
                debug!("Round {} already closed, nothing to advance", round_id);
                Ok(RoundAdvance::Unchanged { round_id })
            }
        }
    }

    /// Advance only while the round is still in `expected`
    ///
    /// Two early triggers fired from the same phase must not move the round
    /// two steps.
    pub fn advance_from(
        &self,
        tx: &mut Transaction<'_>,
        round_id: RoundId,
        expected: RoundPhase,
        now: DateTime<Utc>,
    ) -> CoreResult<RoundAdvance> {
        let phase = tx
            .round(round_id)
            .map(|round| round.phase)
            .ok_or(RoundError::RoundNotFound { round_id })?;
        if phase != expected {
            debug!(
                "Round {} already left {} (now {}), skipping",
                round_id, expected, phase
            );
            return Ok(RoundAdvance::Unchanged { round_id });
        }
        self.advance(tx, round_id, now)
    }

    /// Apply the transition of the current round if its deadline has passed
    ///
    /// Entering final voting restarts the final-voting clock, so one tick moves
    /// a round at most one step.
    pub fn tick(
        &self,
        tx: &mut Transaction<'_>,
        now: DateTime<Utc>,
    ) -> CoreResult<Option<RoundAdvance>> {
        let Some(round) = tx.current_round() else {
            return Ok(None);
        };
        let round_id = round.id;
        match check_transition(round, now) {
            TransitionCheck::NoTransition => Ok(None),
            TransitionCheck::Due(next) => {
                debug!("Round {} deadline passed, moving to {}", round_id, next);
                self.advance(tx, round_id, now).map(Some)
            }
        }
    }

    fn enter_final_voting(
        &self,
        tx: &mut Transaction<'_>,
        round_id: RoundId,
        now: DateTime<Utc>,
    ) -> CoreResult<RoundAdvance> {
        let stats = tx.round_stats(round_id);
        let ranked = rank(stats.into_iter().map(Standing::from).collect());
        let (finalists, dropped): (Vec<ProfileId>, Vec<ProfileId>) = {
            let mut ids = ranked.iter().map(|standing| standing.profile_id.to_string());
            let finalists: Vec<ProfileId> = ids.by_ref().take(self.rules.finalist_count).collect();
            (finalists, ids.collect())
        };

        let final_voting = self.rules.final_voting();
        let round = tx.round_mut(round_id)?;
        apply_transition(round, RoundPhase::FinalVoting, now)?;
        round.finalists = finalists.clone();
        round.final_voting_end_time = now + final_voting;

        for profile_id in &dropped {
            tx.profile_mut(profile_id)?.in_global_round = false;
        }

        info!(
            "Round {} entered final voting with {} finalists ({} dropped)",
            round_id,
            finalists.len(),
            dropped.len()
        );

        Ok(RoundAdvance::FinalVotingStarted {
            round_id,
            finalists,
            dropped,
        })
    }

    pub fn status(&self, tx: &Transaction<'_>, now: DateTime<Utc>) -> RoundStatus {
        let Some(round) = tx.current_round() else {
            return RoundStatus::inactive();
        };
        let participants = match round.phase {
            RoundPhase::Active => tx.round_stats(round.id).len(),
            _ => round.finalists.len(),
        };
        RoundStatus {
            round_id: Some(round.id),
            phase: Some(round.phase),
            time_remaining_seconds: round
                .current_deadline()
                .map(|deadline| seconds_until(deadline, now)),
            participants,
            finalists: round.finalists.clone(),
        }
    }
}

/// Create a fresh `Active` round starting at `now`
pub(crate) fn open_round(tx: &mut Transaction<'_>, rules: &RulesConfig, now: DateTime<Utc>) -> RoundId {
    let rating_end_time = now + rules.rating_phase();
    let round = tx.create_round(now, rating_end_time, rating_end_time + rules.final_voting());
    info!(
        "Opened round {} (rating ends at {})",
        round.id, round.rating_end_time
    );
    round.id
}
