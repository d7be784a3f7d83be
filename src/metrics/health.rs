//! HTTP server for health checks, Prometheus metrics and the JSON API

use crate::metrics::collector::MetricsCollector;
use crate::service::health::{HealthCheck, HealthContext, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    /// `None` until the service finished initialising
    pub context: Option<HealthContext>,
}

pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    api: Option<Router>,
    shutdown_tx: watch::Sender<bool>,
}

impl HealthServer {
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                context: None,
            },
            api: None,
            shutdown_tx,
        }
    }

    pub fn with_context(mut self, context: HealthContext) -> Self {
        self.state.context = Some(context);
        self
    }

    /// Serve `api` next to the monitoring endpoints
    pub fn with_api(mut self, api: Router) -> Self {
        self.api = Some(api);
        self
    }

    /// Bind and serve until [`Self::stop`] is called
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid HTTP server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("HTTP server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
                info!("HTTP server shutdown signal received");
            })
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    fn create_router(&self) -> Router {
        let monitoring = Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .route("/stats", get(stats_handler))
            .with_state(self.state.clone());
        match &self.api {
            Some(api) => monitoring.merge(api.clone()),
            None => monitoring,
        }
    }

    /// Ask the server to drain; safe to call before it started
    pub async fn stop(&self) -> Result<()> {
        self.shutdown_tx.send_replace(true);
        debug!("HTTP server stop requested");
        Ok(())
    }
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": "rank-room",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "/health", "/ready", "/alive", "/metrics", "/stats",
            "/profiles", "/ratings", "/rounds/join", "/rounds/current", "/rounds/last/winners"
        ]
    }))
}

async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Health check requested");
    let Some(context) = &state.context else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": "rank-room",
                "error": "Service not initialized"
            })),
        );
    };

    let status = HealthCheck::liveness_check(context)
        .await
        .unwrap_or(HealthStatus::Unhealthy);
    state.metrics_collector.update_health_status(status.gauge());
    let code = match status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (
        code,
        Json(json!({
            "status": status,
            "service": context.service_name,
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

async fn ready_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let Some(context) = &state.context else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized");
    };
    match HealthCheck::readiness_check(context).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "Ready"),
        Ok(HealthStatus::Degraded) => (StatusCode::OK, "Degraded but ready"),
        Ok(HealthStatus::Unhealthy) => (StatusCode::SERVICE_UNAVAILABLE, "Not ready"),
        Err(e) => {
            error!("Readiness check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
        }
    }
}

async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let Some(context) = &state.context else {
        return (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized");
    };
    match HealthCheck::liveness_check(context).await {
        Ok(HealthStatus::Healthy) => (StatusCode::OK, "Alive"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
    }
}

async fn metrics_handler(State(state): State<HealthServerState>) -> Response {
    let metric_families = state.metrics_collector.registry().gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&metric_families) {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", encoder.format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics".to_string(),
            )
                .into_response()
        }
    }
}

async fn stats_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    let Some(context) = &state.context else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Service not initialized", "timestamp": chrono::Utc::now() })),
        );
    };
    match HealthCheck::check(context).await {
        Ok(health) => {
            state.metrics_collector.update_health_status(health.status.gauge());
            state
                .metrics_collector
                .service()
                .uptime_seconds
                .set(health.uptime_seconds as i64);
            for check in &health.checks {
                state
                    .metrics_collector
                    .update_component_health(&check.name, check.status == HealthStatus::Healthy);
            }
            (StatusCode::OK, Json(json!(health)))
        }
        Err(e) => {
            error!("Failed to get stats: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "Failed to get service stats", "timestamp": chrono::Utc::now() })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RulesConfig;
    use crate::engine::RatingEngine;
    use axum::{body::Body, http::Request};
    use std::time::Instant;
    use tokio::sync::RwLock;
    use tower::ServiceExt;

    fn server(with_context: bool) -> HealthServer {
        let collector = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
        let server = HealthServer::new(HealthServerConfig::default(), collector.clone());
        if !with_context {
            return server;
        }
        server.with_context(HealthContext {
            service_name: "rank-room".to_string(),
            engine: Arc::new(RatingEngine::in_memory(RulesConfig::default(), collector)),
            is_running: Arc::new(RwLock::new(true)),
            amqp: None,
            started_at: Instant::now(),
        })
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_endpoints_without_context() {
        let app = server(false).create_router();
        assert_eq!(get_status(app.clone(), "/").await, StatusCode::OK);
        for uri in ["/health", "/ready", "/alive", "/stats"] {
            assert_eq!(
                get_status(app.clone(), uri).await,
                StatusCode::SERVICE_UNAVAILABLE,
                "{}",
                uri
            );
        }
    }

    #[tokio::test]
    async fn test_endpoints_with_running_service() {
        let app = server(true).create_router();
        for uri in ["/health", "/ready", "/alive", "/stats"] {
            assert_eq!(get_status(app.clone(), uri).await, StatusCode::OK, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let server = server(false);
        server.state.metrics_collector.record_round_opened();
        let response = server
            .create_router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("rank_room_rounds_opened_total"));
    }

    #[tokio::test]
    async fn test_api_is_merged() {
        let api = Router::new().route("/ping", get(|| async { "pong" }));
        let app = server(false).with_api(api).create_router();
        assert_eq!(get_status(app.clone(), "/ping").await, StatusCode::OK);
        assert_eq!(get_status(app, "/nonexistent").await, StatusCode::NOT_FOUND);
    }
}
