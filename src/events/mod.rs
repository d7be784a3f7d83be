//! Outbound events for the chat interface
//!
//! Events are published on a topic exchange when AMQP is enabled and logged
//! otherwise.

pub mod connection;
pub mod messages;
pub mod publisher;

pub use connection::{AmqpConnection, AmqpEndpoint};
pub use messages::*;
pub use publisher::{
    AmqpEventPublisher, EventPublisher, LoggingEventPublisher, PublisherConfig,
    RecentlyPublished, RecordingEventPublisher,
};
