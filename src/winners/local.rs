//! Local-winner sweep award
//!
//! Ranks every profile outside its local-win cooldown by its rolling average
//! and pays the configured tiers. Rolling aggregates are recomputed for all
//! profiles first, so windows that emptied since the last rating decay to zero.

use super::ranking::{award, rank, Standing};
use crate::config::RulesConfig;
use crate::error::CoreResult;
use crate::ledger::wallet;
use crate::storage::Transaction;
use crate::types::{ProfileId, RatingAggregate, RatingScope, WinnerRecord};
use crate::utils::within_window;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LocalWinnerAward {
    rules: Arc<RulesConfig>,
}

impl LocalWinnerAward {
    pub fn new(rules: Arc<RulesConfig>) -> Self {
        Self { rules }
    }

    /// Refresh aggregates and pay the current local winners
    pub fn run(&self, tx: &mut Transaction<'_>, now: DateTime<Utc>) -> CoreResult<Vec<WinnerRecord>> {
        let windows = self.refresh_aggregates(tx, now)?;

        let cooldown = self.rules.local_win_cooldown();
        let eligible: Vec<(ProfileId, u64, u32)> = tx
            .profiles()
            .filter(|profile| !within_window(profile.last_local_win_time, now, cooldown))
            .filter_map(|profile| {
                windows
                    .get(profile.id.as_str())
                    .map(|(sum, count)| (profile.id.clone(), *sum, *count))
            })
            .collect();

        let placements = {
            let ranked = rank(
                eligible
                    .iter()
                    .map(|(id, sum, count)| Standing {
                        profile_id: id,
                        sum: *sum,
                        count: *count,
                    })
                    .collect(),
            );
            let top = &ranked[..ranked.len().min(self.rules.local_winner_count)];
            award(top, &self.rules.local_rewards, 1)
        };

        let mut records = Vec::with_capacity(placements.len());
        for placement in placements {
            if placement.reward > 0 {
                wallet::credit(tx, &placement.profile_id, placement.reward)?;
            }
            tx.profile_mut(&placement.profile_id)?.last_local_win_time = Some(now);
            let record = tx.append_winner(WinnerRecord {
                id: 0,
                profile_id: placement.profile_id,
                place: placement.place,
                coins_awarded: placement.reward,
                round_end_time: now,
                is_global: false,
                round_id: None,
            });
            records.push(record.clone());
        }

        if records.is_empty() {
            debug!("Local sweep found no eligible profiles");
        } else {
            info!("Local sweep recorded {} winners", records.len());
        }
        Ok(records)
    }

    /// Recompute every profile's rolling aggregate, returning the non-empty windows
    fn refresh_aggregates(
        &self,
        tx: &mut Transaction<'_>,
        now: DateTime<Utc>,
    ) -> CoreResult<HashMap<ProfileId, (u64, u32)>> {
        let since = now - self.rules.rolling_window();
        let mut windows: HashMap<ProfileId, (u64, u32)> = HashMap::new();
        for event in tx.rating_events_since(since) {
            if event.scope != RatingScope::Local {
                continue;
            }
            if let Some(value) = event.score.value() {
                let entry = windows.entry(event.target_id.clone()).or_default();
                entry.0 += value as u64;
                entry.1 += 1;
            }
        }

        let stale: Vec<ProfileId> = tx
            .profiles()
            .filter(|profile| {
                let (sum, count) = windows.get(profile.id.as_str()).copied().unwrap_or((0, 0));
                profile.rating.sum != sum || profile.rating.count != count
            })
            .map(|profile| profile.id.clone())
            .collect();
        for profile_id in stale {
            let (sum, count) = windows.get(&profile_id).copied().unwrap_or((0, 0));
            tx.profile_mut(&profile_id)?.rating = RatingAggregate::from_window(sum, count, now);
        }

        Ok(windows)
    }
}
