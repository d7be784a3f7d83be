//! Rank Room - round-based profile rating and reward engine
//!
//! Raters score profiles shown to them by matchmaking. Scores feed a coin
//! ledger, rolling local rankings and timed global rounds with paid places.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ledger;
pub mod matchmaking;
pub mod metrics;
pub mod round;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod types;
pub mod utils;
pub mod winners;

pub use error::{CoreResult, Result, RoundError};
pub use types::*;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{EngineStats, RatingEngine};
pub use events::EventPublisher;
pub use storage::InMemoryStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
