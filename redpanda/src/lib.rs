//! Redpanda event bus for the inventory command processor.
//!
//! Implements [`EventBus`] over rdkafka, so it works against Redpanda or any
//! Kafka-compatible broker. Payloads are passed through untouched: the
//! processor owns the envelope format, this crate only moves bytes.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Nothing is committed on receipt; the subscriber calls
//!   [`commit`](EventBus::commit) once a message has been handled
//! - A commit goes through the live consumer subscribed to the message's
//!   topic and records `offset + 1` for its partition
//! - Messages still buffered or in flight when the process dies are never
//!   committed, so they are redelivered
//! - Ordering holds within a partition; publishing under a key keeps every
//!   message for that key on one partition
//!
//! # Example
//!
//! ```no_run
//! use inventory_cmd_redpanda::RedpandaEventBus;
//! use inventory_cmd_core::EventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("inventory-command")
//!     .build()?;
//!
//! bus.publish("inventory.response", "correlation-id", b"{}").await?;
//!
//! let mut stream = bus.subscribe(&["inventory.command"]).await?;
//! while let Some(message) = stream.next().await {
//!     let message = message?;
//!     println!("{}:{} {} bytes", message.partition, message.offset, message.payload.len());
//!     bus.commit(&message).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use inventory_cmd_core::event_bus::{BusMessage, EventBus, EventBusError, EventStream};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_OFFSET_RESET: &str = "latest";

/// Live consumers by subscribed topic, tagged with the subscription that
/// created them.
type Consumers = Arc<RwLock<HashMap<String, (u64, Arc<StreamConsumer>)>>>;

/// Redpanda event bus.
///
/// One shared producer publishes; every [`subscribe`](EventBus::subscribe)
/// call creates its own consumer in the configured consumer group, so
/// several processor instances split the command topic's partitions
/// between them.
pub struct RedpandaEventBus {
    /// Kafka producer for publishing responses
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Message buffer size for subscribers
    buffer_size: usize,
    /// Auto offset reset policy
    auto_offset_reset: String,
    /// Consumers that commits are routed through
    consumers: Consumers,
    /// Subscription counter
    subscriptions: AtomicU64,
}

impl RedpandaEventBus {
    /// Create an event bus with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Broker addresses.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn consumer_group_for(&self, topics: &[String]) -> String {
        self.consumer_group.clone().unwrap_or_else(|| {
            let mut sorted = topics.to_vec();
            sorted.sort();
            format!("inventory-cmd-{}", sorted.join("-"))
        })
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated broker addresses (e.g. `"localhost:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`. Default `"all"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout. Default 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group shared by every processor instance.
    ///
    /// If not set, one is derived from the subscribed topics.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Messages buffered between the consumer and the subscriber. Zero is
    /// treated as one.
    #[must_use]
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size.max(1));
        self
    }

    /// Where a new consumer group starts reading: `"earliest"`, `"latest"`
    /// or `"error"`.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self.brokers.ok_or_else(|| {
            EventBusError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| DEFAULT_OFFSET_RESET.to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            buffer_size,
            auto_offset_reset,
            consumers: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: AtomicU64::new(0),
        })
    }
}

fn to_bus_message(message: &BorrowedMessage<'_>) -> BusMessage {
    BusMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    }
}

impl EventBus for RedpandaEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            if topic.is_empty() {
                return Err(EventBusError::InvalidTopic("empty topic name".to_string()));
            }

            let record = FutureRecord::to(topic).payload(payload).key(key);
            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(topic, partition, offset, key, "Message published");
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic, error = %kafka_error, "Failed to publish message");
                    Err(EventBusError::PublishFailed {
                        topic: topic.to_string(),
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            if topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "no topics given".to_string(),
                });
            }
            let group_id = self.consumer_group_for(&topics);

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %group_id,
                buffer_size = self.buffer_size,
                manual_commit = true,
                "Subscribed to topics"
            );

            let consumer = Arc::new(consumer);
            let subscription = self.subscriptions.fetch_add(1, Ordering::Relaxed);
            {
                let mut consumers = self.consumers.write().await;
                for topic in &topics {
                    consumers.insert(topic.clone(), (subscription, Arc::clone(&consumer)));
                }
            }

            let (tx, mut rx) = tokio::sync::mpsc::channel(self.buffer_size);
            let registry = Arc::clone(&self.consumers);

            // The task owns the consumer; it stops when the subscriber drops
            // the stream.
            tokio::spawn(async move {
                use futures::StreamExt;

                {
                    let mut stream = consumer.stream();
                    loop {
                        let received = tokio::select! {
                            () = tx.closed() => break,
                            next = stream.next() => match next {
                                Some(received) => received,
                                None => break,
                            },
                        };

                        let forwarded = match received {
                            Ok(message) => {
                                tracing::trace!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    "Received message"
                                );
                                Ok(to_bus_message(&message))
                            }
                            Err(e) => Err(EventBusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ))),
                        };
                        if tx.send(forwarded).await.is_err() {
                            break;
                        }
                    }
                }

                registry
                    .write()
                    .await
                    .retain(|_, (owner, _)| *owner != subscription);
                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn commit<'a>(
        &'a self,
        message: &'a BusMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            let failed = |reason: String| EventBusError::CommitFailed {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
                reason,
            };

            let consumer = self
                .consumers
                .read()
                .await
                .get(&message.topic)
                .map(|(_, consumer)| Arc::clone(consumer));
            let Some(consumer) = consumer else {
                return Err(failed("no live consumer for topic".to_string()));
            };

            let mut position = TopicPartitionList::new();
            position
                .add_partition_offset(
                    &message.topic,
                    message.partition,
                    Offset::Offset(message.offset + 1),
                )
                .map_err(|e| failed(e.to_string()))?;
            consumer
                .commit(&position, CommitMode::Async)
                .map_err(|e| failed(e.to_string()))?;

            tracing::trace!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "Offset committed"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_event_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventBus>();
        assert_sync::<RedpandaEventBus>();
    }

    #[test]
    fn build_without_brokers_fails() {
        assert!(matches!(
            RedpandaEventBus::builder().build(),
            Err(EventBusError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn consumer_group_defaults_from_sorted_topics() {
        // Producer creation does not contact the broker.
        let bus = RedpandaEventBus::new("localhost:9092").unwrap();
        assert_eq!(
            bus.consumer_group_for(&["b".to_string(), "a".to_string()]),
            "inventory-cmd-a-b"
        );

        let grouped = RedpandaEventBus::builder()
            .brokers("localhost:9092")
            .consumer_group("inventory-command")
            .build()
            .unwrap();
        assert_eq!(grouped.consumer_group_for(&["a".to_string()]), "inventory-command");
    }

    #[tokio::test]
    async fn commit_without_a_live_consumer_fails() {
        let bus = RedpandaEventBus::new("localhost:9092").unwrap();
        let message = BusMessage {
            topic: "inventory.command".to_string(),
            partition: 0,
            offset: 41,
            key: None,
            payload: Vec::new(),
        };

        let err = bus.commit(&message).await.unwrap_err();
        assert!(matches!(
            err,
            EventBusError::CommitFailed { partition: 0, offset: 41, .. }
        ));
    }

    #[tokio::test]
    async fn empty_topic_is_rejected_before_sending() {
        let bus = RedpandaEventBus::new("localhost:9092").unwrap();
        let err = bus.publish("", "key", b"{}").await.unwrap_err();
        assert!(matches!(err, EventBusError::InvalidTopic(_)));
    }
}
