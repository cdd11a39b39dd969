//! In-memory [`EventBus`].

#![allow(clippy::unwrap_used)] // Test infrastructure: lock poisoning is a test bug

use inventory_cmd_core::event_bus::{BusMessage, EventBus, EventBusError, EventStream};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Subscriber = (Vec<String>, mpsc::UnboundedSender<Result<BusMessage, EventBusError>>);

#[derive(Debug, Default)]
struct Inner {
    log: Vec<BusMessage>,
    offsets: HashMap<(String, i32), i64>,
    committed: HashMap<(String, i32), i64>,
    commits: usize,
    subscribers: Vec<Subscriber>,
}

/// Broker stand-in with keyed partitioning and a full message log.
///
/// Every published message is appended to the log (inspect it with
/// [`messages`](Self::messages)) and fanned out to live subscribers of its
/// topic. Messages published before a subscription are not replayed.
/// Commits are recorded per partition as the next offset to read, the way a
/// broker stores a consumer group's position.
///
/// # Example
///
/// ```
/// use inventory_cmd_testing::InMemoryEventBus;
/// use inventory_cmd_core::EventBus;
///
/// # tokio_test::block_on(async {
/// let bus = InMemoryEventBus::new();
/// bus.publish("responses", "corr-1", b"{}").await.unwrap();
///
/// let sent = bus.messages("responses");
/// assert_eq!(sent.len(), 1);
/// assert_eq!(sent[0].key.as_deref(), Some(b"corr-1".as_slice()));
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryEventBus {
    inner: Arc<Mutex<Inner>>,
    partitions: i32,
    failing: Arc<AtomicBool>,
}

impl InMemoryEventBus {
    /// Single-partition bus.
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(1)
    }

    /// Bus whose topics have `partitions` partitions (minimum one).
    #[must_use]
    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            partitions: partitions.max(1),
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Every message published to `topic`, in publish order.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<BusMessage> {
        self.inner
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Next offset to read on `topic`/`partition`, if anything was committed.
    #[must_use]
    pub fn committed_offset(&self, topic: &str, partition: i32) -> Option<i64> {
        self.inner
            .lock()
            .unwrap()
            .committed
            .get(&(topic.to_string(), partition))
            .copied()
    }

    /// Number of commit calls received.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.inner.lock().unwrap().commits
    }

    /// Make every subsequent publish fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// End every open subscription stream, as a dropped broker connection
    /// would.
    pub fn disconnect_subscribers(&self) {
        self.inner.lock().unwrap().subscribers.clear();
    }

    /// Number of open subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|(_, tx)| !tx.is_closed());
        inner.subscribers.len()
    }

    fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let bucket = hasher.finish() % u64::from(self.partitions.unsigned_abs());
        i32::try_from(bucket).unwrap_or(0)
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for InMemoryEventBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        payload: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + 'a>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(EventBusError::PublishFailed {
                    topic: topic.to_string(),
                    reason: "broker unavailable".to_string(),
                });
            }

            let partition = self.partition_for(key);
            let mut inner = self.inner.lock().unwrap();
            let offset = inner
                .offsets
                .entry((topic.to_string(), partition))
                .or_insert(0);
            let message = BusMessage {
                topic: topic.to_string(),
                partition,
                offset: *offset,
                key: Some(key.as_bytes().to_vec()),
                payload: payload.to_vec(),
            };
            *offset += 1;

            inner.subscribers.retain(|(topics, tx)| {
                if topics.iter().any(|t| t == topic) {
                    tx.send(Ok(message.clone())).is_ok()
                } else {
                    !tx.is_closed()
                }
            });
            inner.log.push(message);
            drop(inner);

            tracing::trace!(topic, partition, "published to in-memory bus");
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        Box::pin(async move {
            if topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "no topics given".to_string(),
                });
            }

            let (tx, mut rx) = mpsc::unbounded_channel();
            self.inner.lock().unwrap().subscribers.push((topics, tx));

            let stream = async_stream::stream! {
                while let Some(message) = rx.recv().await {
                    yield message;
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
            let mut inner = self.inner.lock().unwrap();
            inner.commits += 1;
            let position = inner
                .committed
                .entry((message.topic.clone(), message.partition))
                .or_insert(0);
            *position = (*position).max(message.offset + 1);
            Ok(())
        })
    }
}
