//! Deterministic ranking shared by global rounds and local sweeps
//!
//! Order: average descending, then vote count descending, then profile id
//! ascending. Entries without votes always rank after entries with votes.
//! Averages are compared by cross-multiplying sums and counts so equal
//! averages tie exactly.

use crate::types::{Coins, Placement, RoundStat};
use crate::utils::{average, compare_averages};
use std::cmp::Ordering;

/// One rankable entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Standing<'a> {
    pub profile_id: &'a str,
    pub sum: u64,
    pub count: u32,
}

impl<'a> From<&'a RoundStat> for Standing<'a> {
    fn from(stat: &'a RoundStat) -> Self {
        Self {
            profile_id: &stat.profile_id,
            sum: stat.rating_sum,
            count: stat.vote_count,
        }
    }
}

/// Ordering where the better standing comes first
pub fn compare_standings(a: &Standing<'_>, b: &Standing<'_>) -> Ordering {
    (b.count > 0)
        .cmp(&(a.count > 0))
        .then_with(|| compare_averages(b.sum, b.count, a.sum, a.count))
        .then_with(|| b.count.cmp(&a.count))
        .then_with(|| a.profile_id.cmp(b.profile_id))
}

/// Sort standings best first
pub fn rank<'a>(mut standings: Vec<Standing<'a>>) -> Vec<Standing<'a>> {
    standings.sort_by(compare_standings);
    standings
}

/// Turn ranked standings into placements, paying `rewards` by place to
/// entries with at least `min_votes` votes
pub fn award(ranked: &[Standing<'_>], rewards: &[Coins], min_votes: u32) -> Vec<Placement> {
    ranked
        .iter()
        .enumerate()
        .map(|(index, standing)| {
            let reward = if standing.count >= min_votes.max(1) {
                rewards.get(index).copied().unwrap_or(0)
            } else {
                0
            };
            Placement {
                profile_id: standing.profile_id.to_string(),
                place: index as u32 + 1,
                reward,
                average: average(standing.sum, standing.count),
                vote_count: standing.count,
            }
        })
        .collect()
}
