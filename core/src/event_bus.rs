//! Event log transport abstraction.
//!
//! Commands arrive on a partitioned, at-least-once log and responses leave on
//! it. The [`EventBus`] trait hides the broker: publish raw bytes under a key,
//! or subscribe to topics and receive a stream of [`BusMessage`]s, then
//! [`commit`](EventBus::commit) each one once it has been handled.
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: a message may be delivered more than once
//! - **Commit after handling**: a consumed message that was never committed
//!   is delivered again after a restart or rebalance
//! - **Ordered within partition**: nothing is promised across partitions
//! - **Keyed publish**: the key chooses the partition, so one key stays ordered
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (`inventory-cmd-testing`): for tests
//! - `RedpandaEventBus` (`inventory-cmd-redpanda`): Kafka-compatible brokers

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Topic not found or invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Failed to record a consumed message as handled
    #[error("Commit failed for {topic}[{partition}]@{offset}: {reason}")]
    CommitFailed {
        /// Topic of the message
        topic: String,
        /// Partition of the message
        partition: i32,
        /// Offset of the message
        offset: i64,
        /// The reason for failure
        reason: String,
    },
}

/// One message received from a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Message key, if the producer set one.
    pub key: Option<Vec<u8>>,
    /// Raw payload.
    pub payload: Vec<u8>,
}

/// Stream of messages from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<BusMessage, EventBusError>> + Send>>;

/// Publish/subscribe access to the event log.
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so it can be shared as
/// `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish `payload` to `topic` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker does not
    /// acknowledge the message.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>>;

    /// Subscribe to one or more topics.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;

    /// Mark `message`, and everything before it on its partition, as handled
    /// for this consumer group.
    ///
    /// Call it only once the message's work is done and in partition order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::CommitFailed`] if the position could not be
    /// recorded. The message is then delivered again later.
    fn commit<'a>(
        &'a self,
        message: &'a BusMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>>;
}
