//! Application state and service coordination
//!
//! [`AppState`] wires the engine to its publisher, the reconciliation
//! scheduler and the HTTP server, and owns the background tasks.

use super::api::{router, ApiState};
use super::health::HealthContext;
use super::rate_limit::RaterRateLimiter;
use crate::clock::SystemClock;
use crate::config::AppConfig;
use crate::engine::RatingEngine;
use crate::events::{
    AmqpConnection, AmqpEventPublisher, EventPublisher, LoggingEventPublisher, PublisherConfig,
};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector};
use crate::scheduler::{ReconciliationScheduler, SweepIntervals};
use crate::storage::InMemoryStore;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

pub struct AppState {
    config: AppConfig,
    engine: Arc<RatingEngine>,
    metrics: Arc<MetricsCollector>,
    scheduler: Arc<ReconciliationScheduler>,
    limiter: Arc<RaterRateLimiter>,
    http_server: Arc<HealthServer>,
    amqp_connection: Option<Arc<AmqpConnection>>,
    http_task: Option<JoinHandle<()>>,
    background_tasks: Vec<JoinHandle<()>>,
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Build every component; nothing runs until [`Self::start`]
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} rating service", config.service.name);

        crate::config::validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let metrics =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let (publisher, amqp_connection) = Self::initialize_publisher(&config).await?;

        let engine = Arc::new(RatingEngine::new(
            Arc::new(config.rules.clone()),
            Arc::new(InMemoryStore::new()),
            Arc::new(SystemClock),
            publisher,
            metrics.clone(),
        ));

        let scheduler = Arc::new(ReconciliationScheduler::new(
            engine.clone(),
            SweepIntervals {
                local: config.local_sweep_interval(),
                global: config.global_sweep_interval(),
            },
        ));
        let limiter = Arc::new(RaterRateLimiter::from_settings(&config.rate_limit).map_err(
            |e| ServiceError::Configuration {
                message: e.to_string(),
            },
        )?);
        let is_running = Arc::new(RwLock::new(false));

        let http_server = Arc::new(
            HealthServer::new(
                HealthServerConfig {
                    port: config.service.http_port,
                    host: "0.0.0.0".to_string(),
                },
                metrics.clone(),
            )
            .with_context(HealthContext {
                service_name: config.service.name.clone(),
                engine: engine.clone(),
                is_running: is_running.clone(),
                amqp: amqp_connection.clone(),
                started_at: Instant::now(),
            })
            .with_api(router(ApiState {
                engine: engine.clone(),
                limiter: limiter.clone(),
            })),
        );

        Ok(Self {
            config,
            engine,
            metrics,
            scheduler,
            limiter,
            http_server,
            amqp_connection,
            http_task: None,
            background_tasks: Vec::new(),
            is_running,
        })
    }

    /// Start the HTTP server, both sweeps and limiter eviction
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting {}", self.config.service.name);
        *self.is_running.write().await = true;

        let http_server = self.http_server.clone();
        let port = self.config.service.http_port;
        self.http_task = Some(tokio::spawn(async move {
            if let Err(e) = http_server.start().await {
                error!("HTTP server failed: {}", e);
            }
        }));
        info!("HTTP server starting on port {}", port);

        let sweeps = self.scheduler.clone().spawn(self.is_running.clone());
        self.background_tasks.extend(sweeps);

        let limiter = self.limiter.clone();
        let window = self.config.rate_limit_window();
        let is_running = self.is_running.clone();
        self.background_tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(window);
            while *is_running.read().await {
                interval.tick().await;
                let evicted = limiter.evict_expired();
                if evicted > 0 {
                    debug!("Evicted {} idle raters from the rate limiter", evicted);
                }
            }
        }));

        self.metrics.update_health_status(2);
        info!("{} started", self.config.service.name);
        Ok(())
    }

    /// Stop background work and report final counters
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown");
        *self.is_running.write().await = false;

        if let Err(e) = self.http_server.stop().await {
            warn!("Failed to stop HTTP server: {}", e);
        }

        if let Some(http_task) = self.http_task.take() {
            let timeout = self.config.shutdown_timeout();
            let abort = http_task.abort_handle();
            if tokio::time::timeout(timeout, http_task).await.is_err() {
                warn!("HTTP server did not drain within {:?}, aborting", timeout);
                abort.abort();
            }
        }

        // Sweep loops sit between ticks; each transaction is synchronous, so an
        // abort never interrupts one half way
        let task_count = self.background_tasks.len();
        for task in self.background_tasks.drain(..) {
            task.abort();
        }
        debug!("Aborted {} background tasks", task_count);

        let stats = self
            .engine
            .stats()
            .await
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            })?;
        info!("Final service statistics: {:?}", stats);

        if let Some(connection) = &self.amqp_connection {
            match connection.close().await {
                Ok(()) => info!("AMQP connection closed"),
                Err(e) => warn!("Failed to close AMQP connection: {}", e),
            }
        }

        info!("Shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn engine(&self) -> Arc<RatingEngine> {
        self.engine.clone()
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// AMQP publisher when enabled, otherwise a publisher that logs events
    async fn initialize_publisher(
        config: &AppConfig,
    ) -> Result<(Arc<dyn EventPublisher>, Option<Arc<AmqpConnection>>), ServiceError> {
        if !config.amqp.enabled {
            info!("AMQP disabled, outbound events go to the log");
            return Ok((Arc::new(LoggingEventPublisher), None));
        }

        info!("Connecting to AMQP broker");
        let connection = AmqpConnection::connect(&config.amqp)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to connect to AMQP: {}", e),
            })?;
        let publisher = AmqpEventPublisher::new(
            connection.channel(),
            PublisherConfig::from(&config.amqp),
        )
        .await
        .map_err(|e| ServiceError::Initialization {
            message: format!("Failed to initialize event publisher: {}", e),
        })?;

        Ok((Arc::new(publisher), Some(Arc::new(connection))))
    }
}
