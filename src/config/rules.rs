//! Game rules: windows, fees, rewards and cooldowns

use crate::types::Coins;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Every tunable constant of the rating engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// A rater may score the same target once per this window (local votes)
    pub local_uniqueness_window_seconds: u64,
    /// Rolling average covers local ratings younger than this
    pub rolling_window_seconds: u64,
    /// Scores at or above this credit the target
    pub high_rating_threshold: u8,
    /// Credited coins are `score - high_rating_offset`
    pub high_rating_offset: u8,
    pub entry_fee: Coins,
    pub rating_phase_seconds: u64,
    pub final_voting_seconds: u64,
    /// Profiles kept in the round when it enters final voting
    pub finalist_count: usize,
    /// Distinct voters in a phase that advance the round early
    pub early_close_voter_threshold: usize,
    /// Global payouts by place, first place first
    pub global_rewards: Vec<Coins>,
    /// Entry is refused for this long after a global win
    pub global_win_cooldown_seconds: u64,
    /// Local sweep payouts by place
    pub local_rewards: Vec<Coins>,
    /// How many profiles a local sweep records as winners
    pub local_winner_count: usize,
    /// A local winner is not re-awarded by sweeps for this long
    pub local_win_cooldown_seconds: u64,
    /// A local winner is hidden from matchmaking for this long
    pub matchmaking_hide_seconds: u64,
    pub starting_balance: Coins,
    /// Votes needed to take a paid global place
    pub min_votes_for_reward: u32,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            local_uniqueness_window_seconds: 3600,
            rolling_window_seconds: 1800,
            high_rating_threshold: 7,
            high_rating_offset: 6,
            entry_fee: 50,
            rating_phase_seconds: 1800,
            final_voting_seconds: 600,
            finalist_count: 10,
            early_close_voter_threshold: 50,
            global_rewards: vec![500, 300, 100],
            global_win_cooldown_seconds: 7200,
            local_rewards: vec![10, 5, 1],
            local_winner_count: 10,
            local_win_cooldown_seconds: 20,
            matchmaking_hide_seconds: 3600,
            starting_balance: 100,
            min_votes_for_reward: 1,
        }
    }
}

impl RulesConfig {
    pub fn local_uniqueness_window(&self) -> Duration {
        seconds(self.local_uniqueness_window_seconds)
    }

    pub fn rolling_window(&self) -> Duration {
        seconds(self.rolling_window_seconds)
    }

    pub fn rating_phase(&self) -> Duration {
        seconds(self.rating_phase_seconds)
    }

    pub fn final_voting(&self) -> Duration {
        seconds(self.final_voting_seconds)
    }

    pub fn global_win_cooldown(&self) -> Duration {
        seconds(self.global_win_cooldown_seconds)
    }

    pub fn local_win_cooldown(&self) -> Duration {
        seconds(self.local_win_cooldown_seconds)
    }

    pub fn matchmaking_hide(&self) -> Duration {
        seconds(self.matchmaking_hide_seconds)
    }

    fn durations(&self) -> [(&'static str, u64); 7] {
        [
            (
                "local_uniqueness_window_seconds",
                self.local_uniqueness_window_seconds,
            ),
            ("rolling_window_seconds", self.rolling_window_seconds),
            ("rating_phase_seconds", self.rating_phase_seconds),
            ("final_voting_seconds", self.final_voting_seconds),
            ("global_win_cooldown_seconds", self.global_win_cooldown_seconds),
            ("local_win_cooldown_seconds", self.local_win_cooldown_seconds),
            ("matchmaking_hide_seconds", self.matchmaking_hide_seconds),
        ]
    }

    /// Coins credited to the target of a local score, zero below the threshold
    pub fn high_rating_reward(&self, score: u8) -> Coins {
        if score >= self.high_rating_threshold {
            score.saturating_sub(self.high_rating_offset) as Coins
        } else {
            0
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.high_rating_threshold == 0 || self.high_rating_threshold > 10 {
            anyhow::bail!("High rating threshold must be between 1 and 10");
        }
        if self.high_rating_offset >= self.high_rating_threshold {
            anyhow::bail!("High rating offset must be below the threshold");
        }
        if self.rating_phase_seconds == 0 || self.final_voting_seconds == 0 {
            anyhow::bail!("Round phases must last longer than 0 seconds");
        }
        for (name, value) in self.durations() {
            if value > MAX_DURATION_SECONDS {
                anyhow::bail!(
                    "{} must be at most {} seconds, got {}",
                    name,
                    MAX_DURATION_SECONDS,
                    value
                );
            }
        }
        if self.finalist_count == 0 {
            anyhow::bail!("Finalist count must be greater than 0");
        }
        if self.early_close_voter_threshold == 0 {
            anyhow::bail!("Early close voter threshold must be greater than 0");
        }
        if self.global_rewards.is_empty() {
            anyhow::bail!("At least one global reward is required");
        }
        if self.local_rewards.len() > self.local_winner_count {
            anyhow::bail!("More local rewards than local winners");
        }
        Ok(())
    }
}

/// Longest window, phase or cooldown a rule may configure: one year
pub const MAX_DURATION_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Rules that unvalidated configs may still push past the cap are clamped
fn seconds(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_DURATION_SECONDS) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let rules = RulesConfig::default();
        assert!(rules.validate().is_ok());
        assert_eq!(rules.entry_fee, 50);
        assert_eq!(rules.rating_phase(), Duration::minutes(30));
        assert_eq!(rules.global_win_cooldown(), Duration::hours(2));
    }

    #[test]
    fn test_high_rating_reward() {
        let rules = RulesConfig::default();
        assert_eq!(rules.high_rating_reward(6), 0);
        assert_eq!(rules.high_rating_reward(7), 1);
        assert_eq!(rules.high_rating_reward(8), 2);
        assert_eq!(rules.high_rating_reward(10), 4);
    }

    #[test]
    fn test_oversized_durations_are_rejected() {
        let rules = RulesConfig {
            rating_phase_seconds: u64::MAX,
            ..RulesConfig::default()
        };
        let err = rules.validate().unwrap_err().to_string();
        assert!(err.contains("rating_phase_seconds"), "{}", err);
        // Accessors clamp instead of overflowing
        assert_eq!(rules.rating_phase(), Duration::days(365));

        let rules = RulesConfig {
            global_win_cooldown_seconds: MAX_DURATION_SECONDS + 1,
            ..RulesConfig::default()
        };
        assert!(rules.validate().is_err());

        let rules = RulesConfig {
            matchmaking_hide_seconds: MAX_DURATION_SECONDS,
            ..RulesConfig::default()
        };
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let rules: RulesConfig = toml::from_str("entry_fee = 75").unwrap();
        assert_eq!(rules.entry_fee, 75);
        assert_eq!(rules.finalist_count, 10);
    }

    #[test]
    fn test_invalid_rules() {
        let mut rules = RulesConfig::default();
        rules.high_rating_offset = 7;
        assert!(rules.validate().is_err());

        let mut rules = RulesConfig::default();
        rules.global_rewards.clear();
        assert!(rules.validate().is_err());
    }
}
