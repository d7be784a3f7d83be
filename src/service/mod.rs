//! Service layer: application wiring, HTTP API, health checks and rate limiting

pub mod api;
pub mod app;
pub mod health;
pub mod rate_limit;

pub use api::{router, ApiState};
pub use app::{AppState, ServiceError};
pub use health::{HealthCheck, HealthContext, HealthStatus};
pub use rate_limit::RaterRateLimiter;
