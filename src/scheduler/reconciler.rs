//! Periodic reconciliation sweeps
//!
//! Two independent loops: the local-winner sweep pays the rolling-average
//! leaders, the global sweep moves rounds past their deadlines. Each sweep has
//! its own [`SingleFlight`] guard, so a tick that fires while the previous one
//! is still running is skipped instead of paying twice.

use super::guard::SingleFlight;
use crate::engine::RatingEngine;
use crate::metrics::MetricsCollector;
use crate::round::RoundAdvance;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const LOCAL_SWEEP: &str = "local_winners";
pub const GLOBAL_SWEEP: &str = "global_rounds";

/// Result of one sweep tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Previous tick still running
    Skipped,
    Completed,
    /// The tick failed; the error was logged and the loop keeps going
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub struct SweepIntervals {
    pub local: Duration,
    pub global: Duration,
}

impl Default for SweepIntervals {
    fn default() -> Self {
        Self {
            local: Duration::from_secs(10),
            global: Duration::from_secs(60),
        }
    }
}

pub struct ReconciliationScheduler {
    engine: Arc<RatingEngine>,
    metrics: Arc<MetricsCollector>,
    intervals: SweepIntervals,
    local_guard: SingleFlight,
    global_guard: SingleFlight,
}

impl ReconciliationScheduler {
    pub fn new(engine: Arc<RatingEngine>, intervals: SweepIntervals) -> Self {
        Self {
            metrics: engine.metrics(),
            engine,
            intervals,
            local_guard: SingleFlight::new(),
            global_guard: SingleFlight::new(),
        }
    }

    pub fn local_guard(&self) -> &SingleFlight {
        &self.local_guard
    }

    pub fn global_guard(&self) -> &SingleFlight {
        &self.global_guard
    }

    /// One local-winner tick
    pub async fn run_local_sweep(&self) -> SweepOutcome {
        let Some(_permit) = self.local_guard.try_acquire() else {
            warn!("Local winner sweep still running, skipping tick");
            self.metrics.record_sweep_overlap(LOCAL_SWEEP);
            return SweepOutcome::Skipped;
        };

        let timer = self.metrics.start_timer();
        let outcome = match self.engine.sweep_local_winners().await {
            Ok(records) => {
                if !records.is_empty() {
                    info!("Local winner sweep paid {} profiles", records.len());
                }
                SweepOutcome::Completed
            }
            Err(e) => {
                error!("Local winner sweep failed: {}", e);
                SweepOutcome::Failed
            }
        };
        self.metrics
            .record_sweep(LOCAL_SWEEP, outcome_label(outcome), timer.stop());
        outcome
    }

    /// One global-round tick
    pub async fn run_global_sweep(&self) -> SweepOutcome {
        let Some(_permit) = self.global_guard.try_acquire() else {
            warn!("Global round sweep still running, skipping tick");
            self.metrics.record_sweep_overlap(GLOBAL_SWEEP);
            return SweepOutcome::Skipped;
        };

        let timer = self.metrics.start_timer();
        let outcome = match self.engine.reconcile_rounds().await {
            Ok(None) => {
                debug!("Global round sweep: nothing due");
                SweepOutcome::Completed
            }
            Ok(Some(advance)) => {
                match &advance {
                    RoundAdvance::FinalVotingStarted { round_id, .. } => {
                        info!("Round {} moved to final voting by the sweep", round_id)
                    }
                    RoundAdvance::Settled(settlement) => {
                        info!("Round {} settled by the sweep", settlement.round_id)
                    }
                    RoundAdvance::Unchanged { .. } => {}
                }
                SweepOutcome::Completed
            }
            Err(e) => {
                error!("Global round sweep failed: {}", e);
                SweepOutcome::Failed
            }
        };
        self.metrics
            .record_sweep(GLOBAL_SWEEP, outcome_label(outcome), timer.stop());
        outcome
    }

    /// Start both sweep loops; they stop once `is_running` turns false
    pub fn spawn(self: Arc<Self>, is_running: Arc<RwLock<bool>>) -> Vec<JoinHandle<()>> {
        let local = {
            let scheduler = self.clone();
            let is_running = is_running.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(scheduler.intervals.local);
                info!(
                    "Local winner sweep started ({}s interval)",
                    scheduler.intervals.local.as_secs()
                );
                while *is_running.read().await {
                    interval.tick().await;
                    scheduler.run_local_sweep().await;
                }
                info!("Local winner sweep stopped");
            })
        };

        let global = {
            let scheduler = self;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(scheduler.intervals.global);
                info!(
                    "Global round sweep started ({}s interval)",
                    scheduler.intervals.global.as_secs()
                );
                while *is_running.read().await {
                    interval.tick().await;
                    scheduler.run_global_sweep().await;
                }
                info!("Global round sweep stopped");
            })
        };

        vec![local, global]
    }
}

fn outcome_label(outcome: SweepOutcome) -> &'static str {
    match outcome {
        SweepOutcome::Skipped => "skipped",
        SweepOutcome::Completed => "ok",
        SweepOutcome::Failed => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RulesConfig;
    use crate::events::RecordingEventPublisher;
    use crate::storage::InMemoryStore;
    use crate::types::{RoundPhase, Score};

    async fn scheduler() -> (Arc<ReconciliationScheduler>, Arc<RatingEngine>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let engine = Arc::new(RatingEngine::new(
            Arc::new(RulesConfig::default()),
            Arc::new(InMemoryStore::new()),
            clock.clone(),
            Arc::new(RecordingEventPublisher::new()),
            Arc::new(MetricsCollector::new().unwrap()),
        ));
        for id in ["a", "b"] {
            engine.register_profile(id, id, None).await.unwrap();
        }
        let scheduler = Arc::new(ReconciliationScheduler::new(
            engine.clone(),
            SweepIntervals::default(),
        ));
        (scheduler, engine, clock)
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let (scheduler, engine, _) = scheduler().await;
        engine.record_rating("a", "b", Score::Rated(9)).await.unwrap();
        let balance = engine.profile("b").await.unwrap().balance;

        let held = scheduler.local_guard().try_acquire().unwrap();
        assert_eq!(scheduler.run_local_sweep().await, SweepOutcome::Skipped);
        assert_eq!(engine.profile("b").await.unwrap().balance, balance);

        drop(held);
        assert_eq!(scheduler.run_local_sweep().await, SweepOutcome::Completed);
        assert_eq!(engine.profile("b").await.unwrap().balance, balance + 10);
    }

    #[tokio::test]
    async fn test_consecutive_local_ticks_pay_once() {
        let (scheduler, engine, clock) = scheduler().await;
        engine.record_rating("a", "b", Score::Rated(5)).await.unwrap();

        scheduler.run_local_sweep().await;
        clock.advance(chrono::Duration::seconds(10));
        scheduler.run_local_sweep().await;
        assert_eq!(engine.profile("b").await.unwrap().balance, 110);
    }

    #[tokio::test]
    async fn test_global_sweep_drives_round() {
        let (scheduler, engine, clock) = scheduler().await;
        engine.join_global_round("a").await.unwrap();

        assert_eq!(scheduler.run_global_sweep().await, SweepOutcome::Completed);
        assert_eq!(
            engine.current_round_status().await.unwrap().phase,
            Some(RoundPhase::Active)
        );

        clock.advance(chrono::Duration::minutes(31));
        scheduler.run_global_sweep().await;
        assert_eq!(
            engine.current_round_status().await.unwrap().phase,
            Some(RoundPhase::FinalVoting)
        );
    }

    #[tokio::test]
    async fn test_global_overlap_is_skipped() {
        let (scheduler, _, _) = scheduler().await;
        let _held = scheduler.global_guard().try_acquire().unwrap();
        assert_eq!(scheduler.run_global_sweep().await, SweepOutcome::Skipped);
    }
}
