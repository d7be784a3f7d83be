//! Metrics collection using Prometheus
//!
//! Metric groups mirror the engine components: service health, ratings and
//! matchmaking, round lifecycle, and periodic sweeps.

use crate::types::{Coins, RatingScope, RoundPhase};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the rating engine
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    rating_metrics: RatingMetrics,
    round_metrics: RoundMetrics,
    sweep_metrics: SweepMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,

    /// Outbound events by kind and status
    pub events_published_total: IntCounterVec,
}

/// Rating and matchmaking metrics
#[derive(Clone)]
pub struct RatingMetrics {
    /// Ratings by scope and outcome code
    pub ratings_total: IntCounterVec,

    /// Coins credited by reason
    pub coins_credited_total: IntCounterVec,

    /// Next-profile requests by result
    pub matchmaking_requests_total: IntCounterVec,

    /// Time spent inside the rating transaction
    pub rating_duration: Histogram,

    /// Requests refused by the per-rater limiter
    pub rate_limited_total: IntCounter,
}

/// Round lifecycle metrics
#[derive(Clone)]
pub struct RoundMetrics {
    pub rounds_opened_total: IntCounter,

    /// Phase transitions by target phase
    pub phase_transitions_total: IntCounterVec,

    /// Participants in the current round
    pub participants: IntGauge,

    /// Join attempts by outcome code
    pub joins_total: IntCounterVec,

    pub entry_fees_total: IntCounter,

    /// Rewards paid by place
    pub rewards_paid_total: IntCounterVec,
}

/// Periodic sweep metrics
#[derive(Clone)]
pub struct SweepMetrics {
    /// Sweep runs by sweep and status
    pub runs_total: IntCounterVec,

    pub duration: HistogramVec,

    /// Ticks skipped because the previous one was still running
    pub overlaps_skipped_total: IntCounterVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        Ok(Self {
            service_metrics: ServiceMetrics::new(&registry)?,
            rating_metrics: RatingMetrics::new(&registry)?,
            round_metrics: RoundMetrics::new(&registry)?,
            sweep_metrics: SweepMetrics::new(&registry)?,
            registry,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn rating(&self) -> &RatingMetrics {
        &self.rating_metrics
    }

    pub fn round(&self) -> &RoundMetrics {
        &self.round_metrics
    }

    pub fn sweep(&self) -> &SweepMetrics {
        &self.sweep_metrics
    }

    /// Record a rating attempt; `outcome` is "ok" or a rejection code
    pub fn record_rating(&self, scope: Option<RatingScope>, outcome: &str, duration: Duration) {
        let scope = scope.map(|scope| scope.label()).unwrap_or("unknown");
        self.rating_metrics
            .ratings_total
            .with_label_values(&[scope, outcome])
            .inc();
        self.rating_metrics
            .rating_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_coins_credited(&self, reason: &str, amount: Coins) {
        if amount > 0 {
            self.rating_metrics
                .coins_credited_total
                .with_label_values(&[reason])
                .inc_by(amount);
        }
    }

    pub fn record_matchmaking(&self, found: bool) {
        let result = if found { "found" } else { "empty" };
        self.rating_metrics
            .matchmaking_requests_total
            .with_label_values(&[result])
            .inc();
    }

    pub fn record_rate_limited(&self) {
        self.rating_metrics.rate_limited_total.inc();
    }

    pub fn record_join(&self, outcome: &str, entry_fee: Coins) {
        self.round_metrics
            .joins_total
            .with_label_values(&[outcome])
            .inc();
        if outcome == "ok" {
            self.round_metrics.entry_fees_total.inc_by(entry_fee);
        }
    }

    pub fn record_round_opened(&self) {
        self.round_metrics.rounds_opened_total.inc();
    }

    pub fn record_phase_transition(&self, to: RoundPhase) {
        self.round_metrics
            .phase_transitions_total
            .with_label_values(&[to.label()])
            .inc();
    }

    pub fn set_participants(&self, participants: usize) {
        self.round_metrics.participants.set(participants as i64);
    }

    pub fn record_reward(&self, place: u32, amount: Coins) {
        self.round_metrics
            .rewards_paid_total
            .with_label_values(&[&place.to_string()])
            .inc_by(amount);
    }

    pub fn record_sweep(&self, sweep: &str, status: &str, duration: Duration) {
        self.sweep_metrics
            .runs_total
            .with_label_values(&[sweep, status])
            .inc();
        self.sweep_metrics
            .duration
            .with_label_values(&[sweep])
            .observe(duration.as_secs_f64());
    }

    pub fn record_sweep_overlap(&self, sweep: &str) {
        self.sweep_metrics
            .overlaps_skipped_total
            .with_label_values(&[sweep])
            .inc();
    }

    pub fn record_event_published(&self, kind: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.service_metrics
            .events_published_total
            .with_label_values(&[kind, status])
            .inc();
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(if healthy { 1 } else { 0 });
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("rank_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "rank_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("rank_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        let events_published_total = IntCounterVec::new(
            Opts::new("rank_room_events_published_total", "Outbound events"),
            &["kind", "status"],
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
            events_published_total,
        })
    }
}

impl RatingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let ratings_total = IntCounterVec::new(
            Opts::new("rank_room_ratings_total", "Ratings by scope and outcome"),
            &["scope", "outcome"],
        )?;
        registry.register(Box::new(ratings_total.clone()))?;

        let coins_credited_total = IntCounterVec::new(
            Opts::new("rank_room_coins_credited_total", "Coins credited by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(coins_credited_total.clone()))?;

        let matchmaking_requests_total = IntCounterVec::new(
            Opts::new(
                "rank_room_matchmaking_requests_total",
                "Next-profile requests by result",
            ),
            &["result"],
        )?;
        registry.register(Box::new(matchmaking_requests_total.clone()))?;

        let rating_duration = Histogram::with_opts(
            HistogramOpts::new(
                "rank_room_rating_duration_seconds",
                "Rating transaction time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(rating_duration.clone()))?;

        let rate_limited_total = IntCounter::new(
            "rank_room_rate_limited_total",
            "Requests refused by the per-rater limiter",
        )?;
        registry.register(Box::new(rate_limited_total.clone()))?;

        Ok(Self {
            ratings_total,
            coins_credited_total,
            matchmaking_requests_total,
            rating_duration,
            rate_limited_total,
        })
    }
}

impl RoundMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let rounds_opened_total =
            IntCounter::new("rank_room_rounds_opened_total", "Global rounds opened")?;
        registry.register(Box::new(rounds_opened_total.clone()))?;

        let phase_transitions_total = IntCounterVec::new(
            Opts::new(
                "rank_room_phase_transitions_total",
                "Round phase transitions",
            ),
            &["phase"],
        )?;
        registry.register(Box::new(phase_transitions_total.clone()))?;

        let participants = IntGauge::new(
            "rank_room_round_participants",
            "Participants in the current round",
        )?;
        registry.register(Box::new(participants.clone()))?;

        let joins_total = IntCounterVec::new(
            Opts::new("rank_room_round_joins_total", "Round join attempts"),
            &["outcome"],
        )?;
        registry.register(Box::new(joins_total.clone()))?;

        let entry_fees_total =
            IntCounter::new("rank_room_entry_fees_total", "Coins collected as entry fees")?;
        registry.register(Box::new(entry_fees_total.clone()))?;

        let rewards_paid_total = IntCounterVec::new(
            Opts::new("rank_room_rewards_paid_total", "Global round rewards paid"),
            &["place"],
        )?;
        registry.register(Box::new(rewards_paid_total.clone()))?;

        Ok(Self {
            rounds_opened_total,
            phase_transitions_total,
            participants,
            joins_total,
            entry_fees_total,
            rewards_paid_total,
        })
    }
}

impl SweepMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let runs_total = IntCounterVec::new(
            Opts::new("rank_room_sweep_runs_total", "Sweep runs"),
            &["sweep", "status"],
        )?;
        registry.register(Box::new(runs_total.clone()))?;

        let duration = HistogramVec::new(
            HistogramOpts::new("rank_room_sweep_duration_seconds", "Sweep duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["sweep"],
        )?;
        registry.register(Box::new(duration.clone()))?;

        let overlaps_skipped_total = IntCounterVec::new(
            Opts::new(
                "rank_room_sweep_overlaps_skipped_total",
                "Sweep ticks skipped because the previous run was still active",
            ),
            &["sweep"],
        )?;
        registry.register(Box::new(overlaps_skipped_total.clone()))?;

        Ok(Self {
            runs_total,
            duration,
            overlaps_skipped_total,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
