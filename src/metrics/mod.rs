//! Metrics and monitoring for the rank-room service

pub mod collector;
pub mod health;

pub use collector::{
    MetricsCollector, MetricsTimer, RatingMetrics, RoundMetrics, ServiceMetrics, SweepMetrics,
};
pub use health::{HealthServer, HealthServerConfig};
