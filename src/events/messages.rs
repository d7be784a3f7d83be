//! Outbound message definitions and serialization

use crate::types::{
    HighRatingNotification, LocalWinners, OutboundEvent, RoundPhaseChanged, RoundResults,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Default topic exchange for all engine events
pub const EVENTS_EXCHANGE: &str = "rank_room.events";

/// Routing keys for events
pub const HIGH_RATING_ROUTING_KEY: &str = "rating.high";
pub const ROUND_PHASE_ROUTING_KEY: &str = "round.phase_changed";
pub const ROUND_RESULTS_ROUTING_KEY: &str = "round.results";
pub const LOCAL_WINNERS_ROUTING_KEY: &str = "winners.local";

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub routing_key: String,
}

/// Stable identity of an event, used as the AMQP message id
///
/// Publishing the same domain event twice yields the same key, so the
/// publisher and downstream consumers can drop the repeat.
pub trait CorrelationKey {
    fn correlation_id(&self) -> String;
}

impl CorrelationKey for HighRatingNotification {
    fn correlation_id(&self) -> String {
        format!("rating-{}", self.event_id)
    }
}

impl CorrelationKey for RoundPhaseChanged {
    fn correlation_id(&self) -> String {
        format!("round-{}-{}", self.round_id, self.to.label())
    }
}

impl CorrelationKey for RoundResults {
    fn correlation_id(&self) -> String {
        format!("results-{}", self.round_id)
    }
}

impl CorrelationKey for LocalWinners {
    fn correlation_id(&self) -> String {
        // Winner record ids are never reused, the first one names the sweep
        match self.winners.first() {
            Some(record) => format!("local-{}", record.id),
            None => format!("local-empty-{}", self.timestamp.timestamp_millis()),
        }
    }
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + DeserializeOwned + CorrelationKey,
{
    pub fn new(payload: T, routing_key: impl Into<String>) -> Self {
        Self {
            correlation_id: payload.correlation_id(),
            payload,
            timestamp: crate::utils::current_timestamp(),
            routing_key: routing_key.into(),
        }
    }
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize message envelope")
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to deserialize message envelope")
    }
}

/// Routing key for an event
pub fn routing_key(event: &OutboundEvent) -> &'static str {
    match event {
        OutboundEvent::HighRating(_) => HIGH_RATING_ROUTING_KEY,
        OutboundEvent::RoundPhaseChanged(_) => ROUND_PHASE_ROUTING_KEY,
        OutboundEvent::RoundResults(_) => ROUND_RESULTS_ROUTING_KEY,
        OutboundEvent::LocalWinners(_) => LOCAL_WINNERS_ROUTING_KEY,
    }
}
