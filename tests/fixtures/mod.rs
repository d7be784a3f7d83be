//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use rank_room::config::RulesConfig;
use rank_room::error::Result;
use rank_room::events::{EventPublisher, RecordingEventPublisher};
use rank_room::metrics::MetricsCollector;
use rank_room::types::{
    HighRatingNotification, LocalWinners, OutboundEvent, RoundPhase, RoundPhaseChanged,
    RoundResults,
};
use rank_room::{InMemoryStore, ManualClock, RatingEngine};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Engine on a manual clock, recording every event it publishes
pub struct TestSystem {
    pub engine: Arc<RatingEngine>,
    pub clock: Arc<ManualClock>,
    pub publisher: Arc<RecordingEventPublisher>,
    pub metrics: Arc<MetricsCollector>,
}

impl TestSystem {
    pub fn new() -> Self {
        Self::with_rules(RulesConfig::default())
    }

    pub fn with_rules(rules: RulesConfig) -> Self {
        let clock = Arc::new(ManualClock::starting_now());
        let publisher = Arc::new(RecordingEventPublisher::new());
        let metrics = Arc::new(MetricsCollector::new().expect("metrics collector"));
        let engine = Arc::new(RatingEngine::new(
            Arc::new(rules),
            Arc::new(InMemoryStore::new()),
            clock.clone(),
            publisher.clone(),
            metrics.clone(),
        ));
        Self {
            engine,
            clock,
            publisher,
            metrics,
        }
    }

    /// Register profiles with the starting balance
    pub async fn register(&self, ids: &[&str]) {
        for id in ids {
            self.engine
                .register_profile(id, &id.to_uppercase(), None)
                .await
                .expect("register profile");
        }
    }

    pub async fn balance(&self, id: &str) -> u64 {
        self.engine.profile(id).await.expect("profile").balance
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(chrono::Duration::minutes(minutes));
    }

    pub fn advance_seconds(&self, seconds: i64) {
        self.clock.advance(chrono::Duration::seconds(seconds));
    }

    /// Target phases of every published phase change, in order
    pub fn phase_changes(&self) -> Vec<RoundPhase> {
        self.publisher
            .events()
            .into_iter()
            .filter_map(|event| match event {
                OutboundEvent::RoundPhaseChanged(change) => Some(change.to),
                _ => None,
            })
            .collect()
    }

    pub fn count_events(&self, kind: &str) -> usize {
        self.publisher
            .events()
            .iter()
            .filter(|event| match event {
                OutboundEvent::HighRating(_) => kind == "high_rating",
                OutboundEvent::RoundPhaseChanged(_) => kind == "round_phase_changed",
                OutboundEvent::RoundResults(_) => kind == "round_results",
                OutboundEvent::LocalWinners(_) => kind == "local_winners",
            })
            .count()
    }
}

/// Publisher whose every call fails, counting attempts
#[derive(Debug, Default)]
pub struct FailingEventPublisher {
    attempts: AtomicUsize,
}

impl FailingEventPublisher {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail(&self) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("broker unavailable"))
    }
}

#[async_trait]
impl EventPublisher for FailingEventPublisher {
    async fn publish_high_rating(&self, _event: HighRatingNotification) -> Result<()> {
        self.fail()
    }

    async fn publish_round_phase_changed(&self, _event: RoundPhaseChanged) -> Result<()> {
        self.fail()
    }

    async fn publish_round_results(&self, _event: RoundResults) -> Result<()> {
        self.fail()
    }

    async fn publish_local_winners(&self, _event: LocalWinners) -> Result<()> {
        self.fail()
    }
}
