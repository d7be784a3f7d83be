//! Event publishers for outbound chat-interface events
//!
//! Delivery is best effort: the engine publishes after its transaction
//! committed and only logs failures.

use super::messages::{
    routing_key, MessageEnvelope, HIGH_RATING_ROUTING_KEY, LOCAL_WINNERS_ROUTING_KEY,
    ROUND_PHASE_ROUTING_KEY, ROUND_RESULTS_ROUTING_KEY,
};
use crate::types::{
    HighRatingNotification, LocalWinners, OutboundEvent, RoundPhaseChanged, RoundResults,
};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Trait for publishing engine events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// A target received a score at or above the reward threshold
    async fn publish_high_rating(&self, event: HighRatingNotification) -> Result<()>;

    async fn publish_round_phase_changed(&self, event: RoundPhaseChanged) -> Result<()>;

    async fn publish_round_results(&self, event: RoundResults) -> Result<()>;

    async fn publish_local_winners(&self, event: LocalWinners) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub enable_deduplication: bool,
    /// Deduplication cache is cleared once it grows past this
    pub dedup_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: super::messages::EVENTS_EXCHANGE.to_string(),
            max_retries: 3,
            retry_delay_ms: 500,
            enable_deduplication: true,
            dedup_capacity: 10_000,
        }
    }
}

impl From<&crate::config::AmqpSettings> for PublisherConfig {
    fn from(settings: &crate::config::AmqpSettings) -> Self {
        Self {
            exchange: settings.exchange_name.clone(),
            max_retries: settings.max_retry_attempts,
            retry_delay_ms: settings.retry_delay_ms,
            ..Self::default()
        }
    }
}

/// Correlation ids of messages this process already delivered
#[derive(Debug)]
pub struct RecentlyPublished {
    ids: Mutex<HashSet<String>>,
    capacity: usize,
}

impl RecentlyPublished {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: Mutex::new(HashSet::new()),
            capacity,
        }
    }

    pub fn contains(&self, correlation_id: &str) -> Result<bool> {
        let ids = self
            .ids
            .lock()
            .map_err(|_| anyhow!("Failed to acquire published messages lock"))?;
        Ok(ids.contains(correlation_id))
    }

    /// Record a delivered id; the whole cache is dropped once full
    pub fn remember(&self, correlation_id: &str) -> Result<()> {
        let mut ids = self
            .ids
            .lock()
            .map_err(|_| anyhow!("Failed to acquire published messages lock"))?;
        if ids.len() >= self.capacity {
            ids.clear();
        }
        ids.insert(correlation_id.to_string());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.lock().map(|ids| ids.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// AMQP-based event publisher
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
    published: RecentlyPublished,
}

impl AmqpEventPublisher {
    /// Create the publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let published = RecentlyPublished::new(config.dedup_capacity);
        let publisher = Self {
            channel,
            config,
            published,
        };
        publisher.setup_exchange().await?;
        Ok(publisher)
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(&self.config.exchange, "topic");
        self.channel
            .exchange_declare(args)
            .await
            .with_context(|| format!("Failed to declare exchange {}", self.config.exchange))?;
        info!("Declared AMQP exchange {}", self.config.exchange);
        Ok(())
    }

    /// Publish with retry and exponential backoff
    async fn publish_envelope<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        if self.config.enable_deduplication
            && self.published.contains(&envelope.correlation_id)?
        {
            debug!(
                "Message {} already published, skipping",
                envelope.correlation_id
            );
            return Ok(());
        }

        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.config.retry_delay_ms);

        loop {
            match self.try_publish(envelope).await {
                Ok(()) => {
                    if self.config.enable_deduplication {
                        self.published.remember(&envelope.correlation_id)?;
                    }
                    debug!(
                        "Published message {} with routing key {}",
                        envelope.correlation_id, envelope.routing_key
                    );
                    return Ok(());
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count > self.config.max_retries {
                        error!(
                            "Failed to publish message {} after {} retries: {}",
                            envelope.correlation_id, self.config.max_retries, e
                        );
                        return Err(e);
                    }
                    warn!(
                        "Publish attempt {} failed for message {}: {}. Retrying in {:?}",
                        retry_count, envelope.correlation_id, e, delay
                    );
                    sleep(delay).await;
                    delay = Duration::from_millis((delay.as_millis() as u64 * 2).min(5000));
                }
            }
        }
    }

    async fn try_publish<T>(&self, envelope: &MessageEnvelope<T>) -> Result<()>
    where
        T: Serialize + DeserializeOwned,
    {
        let payload = envelope.to_bytes()?;
        let args = BasicPublishArguments::new(&self.config.exchange, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        self.channel
            .basic_publish(properties, payload, args)
            .await
            .context("Failed to publish message")
    }

    /// Number of cached message ids (for monitoring)
    pub fn cached_message_count(&self) -> usize {
        self.published.len()
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn publish_high_rating(&self, event: HighRatingNotification) -> Result<()> {
        let envelope = MessageEnvelope::new(event, HIGH_RATING_ROUTING_KEY);
        self.publish_envelope(&envelope).await
    }

    async fn publish_round_phase_changed(&self, event: RoundPhaseChanged) -> Result<()> {
        let envelope = MessageEnvelope::new(event, ROUND_PHASE_ROUTING_KEY);
        self.publish_envelope(&envelope).await
    }

    async fn publish_round_results(&self, event: RoundResults) -> Result<()> {
        let envelope = MessageEnvelope::new(event, ROUND_RESULTS_ROUTING_KEY);
        self.publish_envelope(&envelope).await
    }

    async fn publish_local_winners(&self, event: LocalWinners) -> Result<()> {
        let envelope = MessageEnvelope::new(event, LOCAL_WINNERS_ROUTING_KEY);
        self.publish_envelope(&envelope).await
    }
}

/// Publisher used when AMQP is disabled: events only go to the log
#[derive(Debug, Default)]
pub struct LoggingEventPublisher;

impl LoggingEventPublisher {
    fn log(&self, event: &OutboundEvent) -> Result<()> {
        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        info!(routing_key = routing_key(event), "event: {}", json);
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for LoggingEventPublisher {
    async fn publish_high_rating(&self, event: HighRatingNotification) -> Result<()> {
        self.log(&OutboundEvent::HighRating(event))
    }

    async fn publish_round_phase_changed(&self, event: RoundPhaseChanged) -> Result<()> {
        self.log(&OutboundEvent::RoundPhaseChanged(event))
    }

    async fn publish_round_results(&self, event: RoundResults) -> Result<()> {
        self.log(&OutboundEvent::RoundResults(event))
    }

    async fn publish_local_winners(&self, event: LocalWinners) -> Result<()> {
        self.log(&OutboundEvent::LocalWinners(event))
    }
}

/// In-memory publisher that keeps every event, for tests and dry runs
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<OutboundEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Routing keys of recorded events, in publish order
    pub fn routing_keys(&self) -> Vec<&'static str> {
        self.events().iter().map(routing_key).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn record(&self, event: OutboundEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("Failed to acquire recorded events lock"))?
            .push(event);
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish_high_rating(&self, event: HighRatingNotification) -> Result<()> {
        self.record(OutboundEvent::HighRating(event))
    }

    async fn publish_round_phase_changed(&self, event: RoundPhaseChanged) -> Result<()> {
        self.record(OutboundEvent::RoundPhaseChanged(event))
    }

    async fn publish_round_results(&self, event: RoundResults) -> Result<()> {
        self.record(OutboundEvent::RoundResults(event))
    }

    async fn publish_local_winners(&self, event: LocalWinners) -> Result<()> {
        self.record(OutboundEvent::LocalWinners(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoundPhase;
    use chrono::Utc;

    #[test]
    fn test_publisher_config_from_settings() {
        let settings = crate::config::AmqpSettings::default();
        let config = PublisherConfig::from(&settings);
        assert_eq!(config.exchange, "rank_room.events");
        assert_eq!(config.max_retries, 5);
        assert!(config.enable_deduplication);
    }

    #[test]
    fn test_recently_published_skips_repeats() {
        let published = RecentlyPublished::new(2);
        let event = RoundResults {
            round_id: 9,
            standings: Vec::new(),
            closed_at: Utc::now(),
        };
        let first = MessageEnvelope::new(event.clone(), ROUND_RESULTS_ROUTING_KEY);
        assert!(!published.contains(&first.correlation_id).unwrap());
        published.remember(&first.correlation_id).unwrap();

        // A retried settlement publishes the same results again
        let repeat = MessageEnvelope::new(event, ROUND_RESULTS_ROUTING_KEY);
        assert!(published.contains(&repeat.correlation_id).unwrap());

        published.remember("round-9-closed").unwrap();
        assert_eq!(published.len(), 2);
        // Full: the cache starts over
        published.remember("round-10-active").unwrap();
        assert_eq!(published.len(), 1);
        assert!(!published.contains(&first.correlation_id).unwrap());
    }

    #[tokio::test]
    async fn test_recording_publisher_keeps_order() {
        let publisher = RecordingEventPublisher::new();
        publisher
            .publish_round_phase_changed(RoundPhaseChanged {
                round_id: 1,
                from: None,
                to: RoundPhase::Active,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        publisher
            .publish_local_winners(LocalWinners {
                winners: Vec::new(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(
            publisher.routing_keys(),
            vec![ROUND_PHASE_ROUTING_KEY, LOCAL_WINNERS_ROUTING_KEY]
        );
        publisher.clear();
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn test_logging_publisher_never_fails() {
        let publisher = LoggingEventPublisher;
        let result = publisher
            .publish_round_results(RoundResults {
                round_id: 4,
                standings: Vec::new(),
                closed_at: Utc::now(),
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_mock_publisher_expectations() {
        let mut mock = MockEventPublisher::new();
        mock.expect_publish_high_rating()
            .withf(|event| event.score == 9 && event.coins_awarded == 3)
            .times(1)
            .returning(|_| Ok(()));

        mock.publish_high_rating(HighRatingNotification {
            event_id: 12,
            target_id: "d".to_string(),
            rater_id: "c".to_string(),
            rater_name: "Carol".to_string(),
            rater_photo: None,
            score: 9,
            coins_awarded: 3,
            timestamp: Utc::now(),
        })
        .await
        .unwrap();
    }
}
