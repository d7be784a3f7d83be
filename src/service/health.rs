//! Health checks for the rank-room service
//!
//! Liveness only asks whether the service loop is running; readiness also
//! requires the store to answer. The full check adds the AMQP connection and
//! engine counters.

use crate::engine::{EngineStats, RatingEngine};
use crate::events::AmqpConnection;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value: 0=unhealthy, 1=degraded, 2=healthy
    pub fn gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.gauge() <= other.gauge() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Everything a health check looks at
#[derive(Clone)]
pub struct HealthContext {
    pub service_name: String,
    pub engine: Arc<RatingEngine>,
    pub is_running: Arc<RwLock<bool>>,
    /// `None` when events only go to the log
    pub amqp: Option<Arc<AmqpConnection>>,
    pub started_at: Instant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub uptime_seconds: u64,
    pub checks: Vec<ComponentCheck>,
    pub stats: Option<EngineStats>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub duration_ms: u64,
}

impl HealthCheck {
    /// Full health check of the service
    pub async fn check(context: &HealthContext) -> Result<Self> {
        let mut checks = Vec::new();

        checks.push(Self::check_service_running(context).await);
        let (store_check, stats) = Self::check_store(context).await;
        checks.push(store_check);
        checks.push(Self::check_amqp(context));

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |status, check| status.worst(check.status));

        Ok(HealthCheck {
            status,
            service: context.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            uptime_seconds: context.started_at.elapsed().as_secs(),
            checks,
            stats,
        })
    }

    pub async fn liveness_check(context: &HealthContext) -> Result<HealthStatus> {
        if *context.is_running.read().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Running and able to read the store
    pub async fn readiness_check(context: &HealthContext) -> Result<HealthStatus> {
        if !*context.is_running.read().await {
            return Ok(HealthStatus::Unhealthy);
        }
        Ok(Self::check_store(context).await.0.status)
    }

    async fn check_service_running(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();
        let (status, message) = if *context.is_running.read().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };
        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn check_store(context: &HealthContext) -> (ComponentCheck, Option<EngineStats>) {
        let start = Instant::now();
        let (status, message, stats) = match context.engine.stats().await {
            Ok(stats) => (HealthStatus::Healthy, None, Some(stats)),
            Err(e) => {
                error!("Store health check failed: {}", e);
                (HealthStatus::Unhealthy, Some(e.to_string()), None)
            }
        };
        (
            ComponentCheck {
                name: "store".to_string(),
                status,
                message,
                duration_ms: start.elapsed().as_millis() as u64,
            },
            stats,
        )
    }

    /// A closed broker connection degrades the service: ratings still work,
    /// events are lost
    fn check_amqp(context: &HealthContext) -> ComponentCheck {
        let start = Instant::now();
        let (status, message) = match &context.amqp {
            None => (HealthStatus::Healthy, Some("AMQP disabled".to_string())),
            Some(connection) if connection.is_open() => (HealthStatus::Healthy, None),
            Some(_) => {
                debug!("AMQP connection reported closed");
                (
                    HealthStatus::Degraded,
                    Some("AMQP connection closed".to_string()),
                )
            }
        };
        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
