//! Rating engine facade
//!
//! [`RatingEngine`] is what the chat interface talks to. Each operation runs
//! its core logic inside one store transaction, then publishes the resulting
//! events and records metrics once the transaction has committed. Publishing
//! is best effort: a failed publish is logged and counted, never rolled back.

use crate::clock::{Clock, SystemClock};
use crate::config::RulesConfig;
use crate::error::{CoreResult, RoundError};
use crate::events::{EventPublisher, LoggingEventPublisher};
use crate::ledger::Ledger;
use crate::matchmaking::MatchmakingQueue;
use crate::metrics::MetricsCollector;
use crate::round::{RoundAdvance, RoundStateMachine};
use crate::storage::InMemoryStore;
use crate::types::{
    JoinReceipt, LocalWinners, Placement, Profile, RatingReceipt, RatingScope, RoundId, RoundPhase,
    RoundPhaseChanged, RoundResults, RoundStatus, Score, WinnerRecord,
};
use crate::winners::{LocalWinnerAward, Settlement};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Snapshot counters for the stats endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    pub profiles: usize,
    pub rating_events: usize,
    pub winner_records: usize,
    pub enrolled_profiles: usize,
    pub round: RoundStatus,
}

pub struct RatingEngine {
    store: Arc<InMemoryStore>,
    clock: Arc<dyn Clock>,
    rules: Arc<RulesConfig>,
    ledger: Ledger,
    queue: MatchmakingQueue,
    rounds: RoundStateMachine,
    local_award: LocalWinnerAward,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
}

impl RatingEngine {
    pub fn new(
        rules: Arc<RulesConfig>,
        store: Arc<InMemoryStore>,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            ledger: Ledger::new(rules.clone()),
            queue: MatchmakingQueue::new(rules.clone()),
            rounds: RoundStateMachine::new(rules.clone()),
            local_award: LocalWinnerAward::new(rules.clone()),
            rules,
            store,
            clock,
            publisher,
            metrics,
        }
    }

    /// Engine on a fresh store with the wall clock, logging its events
    pub fn in_memory(rules: RulesConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self::new(
            Arc::new(rules),
            Arc::new(InMemoryStore::new()),
            Arc::new(SystemClock),
            Arc::new(LoggingEventPublisher),
            metrics,
        )
    }

    pub fn rules(&self) -> &RulesConfig {
        &self.rules
    }

    pub fn store(&self) -> Arc<InMemoryStore> {
        self.store.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Create a profile with the starting balance, or return the existing one
    pub async fn register_profile(
        &self,
        profile_id: &str,
        display_name: &str,
        photo: Option<String>,
    ) -> CoreResult<Profile> {
        let now = self.clock.now();
        let starting_balance = self.rules.starting_balance;
        self.store.transaction(|tx| {
            if let Some(existing) = tx.profile(profile_id) {
                debug!("Profile {} already registered", profile_id);
                return Ok(existing.clone());
            }
            let mut profile = Profile::new(profile_id, display_name, starting_balance);
            profile.photo = photo;
            profile.created_at = now;
            tx.insert_profile(profile.clone());
            info!(
                "Registered profile {} with {} coins",
                profile_id, starting_balance
            );
            Ok(profile)
        })
    }

    pub async fn profile(&self, profile_id: &str) -> CoreResult<Profile> {
        self.store
            .read(|tx| tx.require_profile(profile_id).cloned())
    }

    /// Next profile to show the rater, `None` when nobody is eligible
    pub async fn next_profile(&self, rater_id: &str) -> CoreResult<Option<Profile>> {
        let picked = self
            .queue
            .next_profile(&self.store, rater_id, self.clock.now())?;
        self.metrics.record_matchmaking(picked.is_some());
        Ok(picked)
    }

    /// Record one rating and run the early trigger when the round hit its threshold
    pub async fn record_rating(
        &self,
        rater_id: &str,
        target_id: &str,
        score: Score,
    ) -> CoreResult<RatingReceipt> {
        let timer = self.metrics.start_timer();
        let now = self.clock.now();
        let result = self
            .store
            .transaction(|tx| self.ledger.record_rating(tx, rater_id, target_id, score, now));

        let receipt = match result {
            Ok(receipt) => receipt,
            Err(e) => {
                self.metrics.record_rating(None, e.code(), timer.stop());
                if e.is_rejection() {
                    debug!("Rating {} -> {} rejected: {}", rater_id, target_id, e);
                } else {
                    error!("Rating {} -> {} failed: {}", rater_id, target_id, e);
                }
                return Err(e);
            }
        };
        self.metrics
            .record_rating(Some(receipt.scope), "ok", timer.stop());

        if let Some(notification) = &receipt.notification {
            self.metrics
                .record_coins_credited("high_rating", notification.coins_awarded);
            self.publish("high_rating", self.publisher.publish_high_rating(notification.clone()))
                .await;
        }

        if receipt.threshold_reached {
            if let (RatingScope::Global(round_id), Some(phase)) =
                (receipt.scope, receipt.phase)
            {
                self.early_advance(round_id, phase).await;
            }
        }

        Ok(receipt)
    }

    /// Pay the entry fee and enrol in the running round, opening one if needed
    pub async fn join_global_round(&self, profile_id: &str) -> CoreResult<JoinReceipt> {
        let now = self.clock.now();
        let result = self
            .store
            .transaction(|tx| self.rounds.join(tx, profile_id, now));

        match &result {
            Ok(receipt) => {
                self.metrics.record_join("ok", receipt.entry_fee);
                if receipt.round_created {
                    self.metrics.record_round_opened();
                    self.metrics.record_phase_transition(RoundPhase::Active);
                    self.publish_phase_changed(receipt.round_id, None, RoundPhase::Active, now)
                        .await;
                }
                self.refresh_participants().await;
            }
            Err(e) => {
                self.metrics.record_join(e.code(), 0);
                debug!("Join by {} rejected: {}", profile_id, e);
            }
        }
        result
    }

    pub async fn current_round_status(&self) -> CoreResult<RoundStatus> {
        let now = self.clock.now();
        self.store.read(|tx| Ok(self.rounds.status(tx, now)))
    }

    /// Standings of the most recently closed round, empty before the first one
    pub async fn winners_of_last_round(&self) -> CoreResult<Vec<Placement>> {
        self.store.read(|tx| {
            Ok(tx
                .latest_closed_round()
                .map(|round| round.standings.clone())
                .unwrap_or_default())
        })
    }

    /// Settle `round_id` if it is in final voting; a closed round returns its stored standings
    pub async fn resolve_round(&self, round_id: RoundId) -> CoreResult<Settlement> {
        let now = self.clock.now();
        let before = self.phase_of(round_id)?;
        let settlement = self
            .store
            .transaction(|tx| self.rounds.resolver().resolve(tx, round_id, now))?;
        if settlement.newly_closed {
            self.publish_settlement(&settlement, before, now).await;
        }
        Ok(settlement)
    }

    /// Local-winner sweep body: pay the current top profiles by rolling average
    pub async fn sweep_local_winners(&self) -> CoreResult<Vec<WinnerRecord>> {
        let now = self.clock.now();
        let records = self.store.transaction(|tx| self.local_award.run(tx, now))?;
        if records.is_empty() {
            return Ok(records);
        }

        for record in records.iter().filter(|record| record.coins_awarded > 0) {
            self.metrics
                .record_coins_credited("local_win", record.coins_awarded);
        }
        self.publish(
            "local_winners",
            self.publisher.publish_local_winners(LocalWinners {
                winners: records.clone(),
                timestamp: now,
            }),
        )
        .await;
        Ok(records)
    }

    /// Global-round sweep body: apply the transition whose deadline has passed
    pub async fn reconcile_rounds(&self) -> CoreResult<Option<RoundAdvance>> {
        let now = self.clock.now();
        let before = self.store.read(|tx| Ok(tx.current_round().map(|r| r.phase)))?;
        let advance = self.store.transaction(|tx| self.rounds.tick(tx, now))?;
        if let (Some(advance), Some(before)) = (&advance, before) {
            self.publish_advance(advance, before, now).await;
        }
        Ok(advance)
    }

    pub async fn stats(&self) -> CoreResult<EngineStats> {
        let now = self.clock.now();
        self.store.read(|tx| {
            Ok(EngineStats {
                profiles: tx.profiles().count(),
                rating_events: tx.rating_event_count(),
                winner_records: tx.winner_records().count(),
                enrolled_profiles: tx.profiles().filter(|p| p.in_global_round).count(),
                round: self.rounds.status(tx, now),
            })
        })
    }

    /// Move the round one step because it reached its voter threshold
    ///
    /// Failures here are logged only; the scheduler will still move the round
    /// at its deadline.
    async fn early_advance(&self, round_id: RoundId, phase: RoundPhase) {
        let now = self.clock.now();
        let result = self
            .store
            .transaction(|tx| self.rounds.advance_from(tx, round_id, phase, now));
        match result {
            Ok(advance) => {
                info!("Round {} advanced early from {}", round_id, phase);
                self.publish_advance(&advance, phase, now).await;
            }
            Err(e) => warn!("Early advance of round {} failed: {}", round_id, e),
        }
    }

    fn phase_of(&self, round_id: RoundId) -> CoreResult<RoundPhase> {
        self.store.read(|tx| {
            tx.round(round_id)
                .map(|round| round.phase)
                .ok_or(RoundError::RoundNotFound { round_id })
        })
    }

    async fn publish_advance(
        &self,
        advance: &RoundAdvance,
        before: RoundPhase,
        now: DateTime<Utc>,
    ) {
        match advance {
            RoundAdvance::Unchanged { .. } => {}
            RoundAdvance::FinalVotingStarted {
                round_id,
                finalists,
                ..
            } => {
                self.metrics.record_phase_transition(RoundPhase::FinalVoting);
                self.metrics.set_participants(finalists.len());
                self.publish_phase_changed(*round_id, Some(before), RoundPhase::FinalVoting, now)
                    .await;
            }
            RoundAdvance::Settled(settlement) if settlement.newly_closed => {
                self.publish_settlement(settlement, before, now).await;
            }
            RoundAdvance::Settled(_) => {}
        }
    }

    async fn publish_settlement(
        &self,
        settlement: &Settlement,
        before: RoundPhase,
        now: DateTime<Utc>,
    ) {
        let round_id = settlement.round_id;
        let mut from = before;
        if before == RoundPhase::FinalVoting {
            self.metrics.record_phase_transition(RoundPhase::RewardPhase);
            self.publish_phase_changed(round_id, Some(from), RoundPhase::RewardPhase, now)
                .await;
            from = RoundPhase::RewardPhase;
        }
        self.metrics.record_phase_transition(RoundPhase::Closed);
        self.publish_phase_changed(round_id, Some(from), RoundPhase::Closed, now)
            .await;

        for placement in settlement.paid() {
            self.metrics.record_reward(placement.place, placement.reward);
            self.metrics
                .record_coins_credited("global_win", placement.reward);
        }
        self.publish(
            "round_results",
            self.publisher.publish_round_results(RoundResults {
                round_id,
                standings: settlement.standings.clone(),
                closed_at: settlement.closed_at,
            }),
        )
        .await;

        if let Some(next) = settlement.next_round_id {
            self.metrics.record_round_opened();
            self.metrics.record_phase_transition(RoundPhase::Active);
            self.metrics.set_participants(0);
            self.publish_phase_changed(next, None, RoundPhase::Active, now)
                .await;
        }
    }

    async fn publish_phase_changed(
        &self,
        round_id: RoundId,
        from: Option<RoundPhase>,
        to: RoundPhase,
        now: DateTime<Utc>,
    ) {
        self.publish(
            "round_phase_changed",
            self.publisher.publish_round_phase_changed(RoundPhaseChanged {
                round_id,
                from,
                to,
                timestamp: now,
            }),
        )
        .await;
    }

    async fn publish<F>(&self, kind: &str, publish: F)
    where
        F: std::future::Future<Output = anyhow::Result<()>>,
    {
        match publish.await {
            Ok(()) => self.metrics.record_event_published(kind, true),
            Err(e) => {
                self.metrics.record_event_published(kind, false);
                warn!("Failed to publish {} event: {}", kind, e);
            }
        }
    }

    async fn refresh_participants(&self) {
        match self.current_round_status().await {
            Ok(status) => self.metrics.set_participants(status.participants),
            Err(e) => debug!("Could not refresh participant gauge: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::publisher::MockEventPublisher;
    use crate::events::RecordingEventPublisher;
    use crate::types::OutboundEvent;
    use chrono::Duration;

    fn engine_with(publisher: Arc<dyn EventPublisher>) -> (RatingEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = RatingEngine::new(
            Arc::new(RulesConfig::default()),
            Arc::new(InMemoryStore::new()),
            clock.clone(),
            publisher,
            Arc::new(MetricsCollector::new().unwrap()),
        );
        (engine, clock)
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (engine, _) = engine_with(Arc::new(RecordingEventPublisher::new()));
        let first = engine.register_profile("a", "Ann", None).await.unwrap();
        assert_eq!(first.balance, 100);

        let second = engine
            .register_profile("a", "Someone else", Some("x.jpg".into()))
            .await
            .unwrap();
        assert_eq!(second.display_name, "Ann");
        assert_eq!(engine.stats().await.unwrap().profiles, 1);
    }

    #[tokio::test]
    async fn test_high_rating_is_published() {
        let mut mock = MockEventPublisher::new();
        mock.expect_publish_high_rating()
            .withf(|event| event.target_id == "d" && event.coins_awarded == 3)
            .times(1)
            .returning(|_| Ok(()));
        let (engine, _) = engine_with(Arc::new(mock));
        engine.register_profile("c", "Carol", None).await.unwrap();
        engine.register_profile("d", "Dave", None).await.unwrap();

        let receipt = engine
            .record_rating("c", "d", Score::Rated(9))
            .await
            .unwrap();
        assert_eq!(receipt.coins_awarded, 3);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_committed_state() {
        let mut mock = MockEventPublisher::new();
        mock.expect_publish_high_rating()
            .returning(|_| Err(anyhow::anyhow!("broker down")));
        let (engine, _) = engine_with(Arc::new(mock));
        engine.register_profile("c", "Carol", None).await.unwrap();
        engine.register_profile("d", "Dave", None).await.unwrap();

        assert!(engine.record_rating("c", "d", Score::Rated(10)).await.is_ok());
        assert_eq!(engine.profile("d").await.unwrap().balance, 104);
    }

    #[tokio::test]
    async fn test_early_trigger_advances_round() {
        let publisher = Arc::new(RecordingEventPublisher::new());
        let clock = Arc::new(ManualClock::starting_now());
        let rules = RulesConfig {
            early_close_voter_threshold: 2,
            ..RulesConfig::default()
        };
        let engine = RatingEngine::new(
            Arc::new(rules),
            Arc::new(InMemoryStore::new()),
            clock.clone(),
            publisher.clone(),
            Arc::new(MetricsCollector::new().unwrap()),
        );
        for id in ["a", "v1", "v2"] {
            engine.register_profile(id, id, None).await.unwrap();
        }
        engine.join_global_round("a").await.unwrap();

        engine.record_rating("v1", "a", Score::Rated(6)).await.unwrap();
        let status = engine.current_round_status().await.unwrap();
        assert_eq!(status.phase, Some(RoundPhase::Active));

        let receipt = engine.record_rating("v2", "a", Score::Rated(8)).await.unwrap();
        assert!(receipt.threshold_reached);
        let status = engine.current_round_status().await.unwrap();
        assert_eq!(status.phase, Some(RoundPhase::FinalVoting));
        assert_eq!(status.finalists, vec!["a".to_string()]);

        let phases: Vec<RoundPhase> = publisher
            .events()
            .into_iter()
            .filter_map(|event| match event {
                OutboundEvent::RoundPhaseChanged(change) => Some(change.to),
                _ => None,
            })
            .collect();
        assert_eq!(phases, vec![RoundPhase::Active, RoundPhase::FinalVoting]);
    }

    #[tokio::test]
    async fn test_early_trigger_in_final_voting_settles_round() {
        let publisher = Arc::new(RecordingEventPublisher::new());
        let rules = RulesConfig {
            early_close_voter_threshold: 2,
            ..RulesConfig::default()
        };
        let engine = RatingEngine::new(
            Arc::new(rules),
            Arc::new(InMemoryStore::new()),
            Arc::new(ManualClock::starting_now()),
            publisher.clone(),
            Arc::new(MetricsCollector::new().unwrap()),
        );
        for id in ["a", "b", "v1", "v2", "v3", "v4"] {
            engine.register_profile(id, id, None).await.unwrap();
        }
        let round_id = engine.join_global_round("a").await.unwrap().round_id;
        engine.join_global_round("b").await.unwrap();

        engine.record_rating("v1", "a", Score::Rated(9)).await.unwrap();
        engine.record_rating("v2", "b", Score::Rated(6)).await.unwrap();
        let status = engine.current_round_status().await.unwrap();
        assert_eq!(status.phase, Some(RoundPhase::FinalVoting));

        // Final-voting voters are counted afresh
        let receipt = engine.record_rating("v3", "a", Score::Rated(10)).await.unwrap();
        assert!(!receipt.threshold_reached);
        let receipt = engine.record_rating("v4", "b", Score::Rated(5)).await.unwrap();
        assert_eq!(receipt.phase, Some(RoundPhase::FinalVoting));
        assert!(receipt.threshold_reached);

        let status = engine.current_round_status().await.unwrap();
        assert_eq!(status.round_id, Some(round_id + 1));
        assert_eq!(status.phase, Some(RoundPhase::Active));

        let winners: Vec<(String, u64)> = engine
            .winners_of_last_round()
            .await
            .unwrap()
            .into_iter()
            .map(|placement| (placement.profile_id, placement.reward))
            .collect();
        assert_eq!(
            winners,
            vec![("a".to_string(), 500), ("b".to_string(), 300)]
        );
        assert_eq!(engine.profile("a").await.unwrap().balance, 550);
        assert_eq!(engine.profile("b").await.unwrap().balance, 350);

        let events = publisher.events();
        let phases: Vec<RoundPhase> = events
            .iter()
            .filter_map(|event| match event {
                OutboundEvent::RoundPhaseChanged(change) => Some(change.to),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![
                RoundPhase::Active,
                RoundPhase::FinalVoting,
                RoundPhase::RewardPhase,
                RoundPhase::Closed,
                RoundPhase::Active,
            ]
        );
        let results = events
            .iter()
            .filter(|event| matches!(event, OutboundEvent::RoundResults(_)))
            .count();
        assert_eq!(results, 1);
    }

    #[tokio::test]
    async fn test_reconcile_follows_deadlines() {
        let publisher = Arc::new(RecordingEventPublisher::new());
        let (engine, clock) = engine_with(publisher.clone());
        engine.register_profile("a", "Ann", None).await.unwrap();
        engine.register_profile("b", "Bob", None).await.unwrap();
        engine.join_global_round("a").await.unwrap();
        engine.record_rating("b", "a", Score::Rated(9)).await.unwrap();

        assert!(engine.reconcile_rounds().await.unwrap().is_none());

        clock.advance(Duration::minutes(30));
        let advance = engine.reconcile_rounds().await.unwrap();
        assert!(matches!(
            advance,
            Some(RoundAdvance::FinalVotingStarted { .. })
        ));

        clock.advance(Duration::minutes(10));
        let advance = engine.reconcile_rounds().await.unwrap();
        assert!(matches!(advance, Some(RoundAdvance::Settled(_))));

        let winners = engine.winners_of_last_round().await.unwrap();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].reward, 500);
        assert_eq!(engine.profile("a").await.unwrap().balance, 550);
        assert!(publisher
            .routing_keys()
            .contains(&crate::events::ROUND_RESULTS_ROUTING_KEY));
    }

    #[tokio::test]
    async fn test_no_winners_before_first_close() {
        let (engine, _) = engine_with(Arc::new(RecordingEventPublisher::new()));
        assert!(engine.winners_of_last_round().await.unwrap().is_empty());
        assert!(engine.current_round_status().await.unwrap().is_inactive());
    }
}
