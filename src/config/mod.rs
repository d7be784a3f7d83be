//! Configuration management for the rank-room service
//!
//! This module handles configuration loading from files and environment
//! variables, validation, and the default game rules.

pub mod app;
pub mod rules;

// Re-export commonly used types
pub use app::{
    validate_config, AmqpSettings, AppConfig, RateLimitSettings, SchedulerSettings,
    ServiceSettings,
};
pub use rules::RulesConfig;
