//! Global round settlement
//!
//! The phase check and every reward write share one transaction, so settling a
//! round twice can never pay twice: the second call finds the round `Closed`
//! and returns the stored standings.

use super::ranking::{award, rank, Standing};
use crate::config::RulesConfig;
use crate::error::{CoreResult, RoundError};
use crate::ledger::wallet;
use crate::round::machine::open_round;
use crate::round::phase::apply_transition;
use crate::storage::Transaction;
use crate::types::{GlobalRound, Placement, RoundId, RoundPhase, WinnerRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of resolving a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub round_id: RoundId,
    pub standings: Vec<Placement>,
    pub closed_at: DateTime<Utc>,
    /// False when the round had already been closed by an earlier call;
    /// every other field is the same on every resolve
    pub newly_closed: bool,
    /// Round opened by the transaction that closed this one
    pub next_round_id: Option<RoundId>,
}

impl Settlement {
    /// Placements that received coins
    pub fn paid(&self) -> impl Iterator<Item = &Placement> {
        self.standings.iter().filter(|placement| placement.reward > 0)
    }
}

#[derive(Debug, Clone)]
pub struct WinnerResolver {
    rules: Arc<RulesConfig>,
}

impl WinnerResolver {
    pub fn new(rules: Arc<RulesConfig>) -> Self {
        Self { rules }
    }

    /// Standings of `round_id`, settling it first if final voting is running
    pub fn resolve(
        &self,
        tx: &mut Transaction<'_>,
        round_id: RoundId,
        now: DateTime<Utc>,
    ) -> CoreResult<Settlement> {
        let round = tx
            .round(round_id)
            .ok_or(RoundError::RoundNotFound { round_id })?;
        match round.phase {
            RoundPhase::Closed => Ok(stored_settlement(round, now)),
            RoundPhase::Active => Err(RoundError::InvalidPhase {
                round_id,
                phase: round.phase,
            }),
            RoundPhase::FinalVoting | RoundPhase::RewardPhase => self.settle(tx, round_id, now),
        }
    }

    /// Pay the round's winners, close it and open the next round
    pub(crate) fn settle(
        &self,
        tx: &mut Transaction<'_>,
        round_id: RoundId,
        now: DateTime<Utc>,
    ) -> CoreResult<Settlement> {
        let round = tx.round_mut(round_id)?;
        match round.phase {
            RoundPhase::FinalVoting => {
                apply_transition(round, RoundPhase::RewardPhase, now)?;
            }
            RoundPhase::RewardPhase => {}
            RoundPhase::Closed => {
                debug!("Round {} already settled", round_id);
                return Ok(stored_settlement(round, now));
            }
            RoundPhase::Active => {
                return Err(RoundError::InvalidPhase {
                    round_id,
                    phase: round.phase,
                })
            }
        }
        let finalists = round.finalists.clone();

        let standings = {
            let stats = tx.round_stats(round_id);
            let ranked = rank(
                stats
                    .into_iter()
                    .filter(|stat| finalists.contains(&stat.profile_id))
                    .map(Standing::from)
                    .collect(),
            );
            award(
                &ranked,
                &self.rules.global_rewards,
                self.rules.min_votes_for_reward,
            )
        };

        for placement in standings.iter().filter(|placement| placement.reward > 0) {
            wallet::credit(tx, &placement.profile_id, placement.reward)?;
            tx.profile_mut(&placement.profile_id)?.last_global_win_time = Some(now);
            tx.append_winner(WinnerRecord {
                id: 0,
                profile_id: placement.profile_id.clone(),
                place: placement.place,
                coins_awarded: placement.reward,
                round_end_time: now,
                is_global: true,
                round_id: Some(round_id),
            });
            info!(
                "Round {} place {}: {} wins {} coins",
                round_id, placement.place, placement.profile_id, placement.reward
            );
        }

        let enrolled: Vec<String> = tx
            .profiles()
            .filter(|profile| profile.in_global_round)
            .map(|profile| profile.id.clone())
            .collect();
        for profile_id in &enrolled {
            tx.profile_mut(profile_id)?.in_global_round = false;
        }

        let round = tx.round_mut(round_id)?;
        round.standings = standings.clone();
        apply_transition(round, RoundPhase::Closed, now)?;

        let next_round_id = open_round(tx, &self.rules, now);
        tx.round_mut(round_id)?.next_round_id = Some(next_round_id);

        info!(
            "Round {} closed with {} ranked participants, round {} opened",
            round_id,
            standings.len(),
            next_round_id
        );

        Ok(Settlement {
            round_id,
            standings,
            closed_at: now,
            newly_closed: true,
            next_round_id: Some(next_round_id),
        })
    }
}

fn stored_settlement(round: &GlobalRound, now: DateTime<Utc>) -> Settlement {
    Settlement {
        round_id: round.id,
        standings: round.standings.clone(),
        closed_at: round.closed_at.unwrap_or(now),
        newly_closed: false,
        next_round_id: round.next_round_id,
    }
}
