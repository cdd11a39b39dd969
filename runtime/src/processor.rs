//! Event processor: the consume → dispatch → respond loop.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     subscribe(command topic)
//!     for each message:
//!         hand to the worker for (topic, partition)
//!     stream ended / subscribe failed → back off, resubscribe
//! }
//!
//! worker, for each message in partition order:
//!     decode envelope (undecodable → log, count, skip)
//!     dispatch → publish response
//!     commit the message
//! ```
//!
//! Each `(topic, partition)` gets its own worker task fed through a bounded
//! channel, so one partition's events are handled in log order while
//! different partitions run concurrently. Ordering between partitions is
//! not preserved; item locks serialize stock changes across them.
//!
//! A message is committed only after its response has been published (or
//! after it was skipped as undecodable), and each partition commits in log
//! order. A message that was consumed but not finished when the process
//! stops is therefore delivered again.
//!
//! On shutdown the workers' channels are closed and the processor waits for
//! them to drain, up to the configured timeout. Workers still busy at the
//! deadline are aborted without committing.

use crate::metrics::CommandMetrics;
use crate::response::ResponseEmitter;
use crate::retry::RetryPolicy;
use crate::router::CommandRouter;
use futures::StreamExt;
use inventory_cmd_core::{
    BusMessage, DomainEvent, EventBus, EventStream, LockCoordinator, RecordStore,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Processor settings.
#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    /// Topic carrying inbound domain events.
    pub command_topic: String,
    /// Per-partition queue depth before the consumer waits.
    pub partition_buffer: usize,
    /// Backoff between resubscription attempts. Only the delays are used;
    /// resubscription never gives up.
    pub reconnect: RetryPolicy,
    /// Upper bound on draining in-flight events at shutdown.
    pub shutdown_timeout: Duration,
}

impl ProcessorConfig {
    /// Defaults for everything but the topic.
    #[must_use]
    pub fn new(command_topic: impl Into<String>) -> Self {
        Self {
            command_topic: command_topic.into(),
            partition_buffer: 64,
            reconnect: RetryPolicy::builder()
                .initial_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(30))
                .jitter(0.2)
                .build(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared handles every worker needs.
struct Handles {
    store: Arc<dyn RecordStore>,
    locks: Arc<dyn LockCoordinator>,
    bus: Arc<dyn EventBus>,
    router: CommandRouter,
    emitter: ResponseEmitter,
}

struct PartitionWorker {
    sender: mpsc::Sender<BusMessage>,
    handle: JoinHandle<()>,
}

/// Consumes domain events and answers every one of them.
pub struct EventProcessor {
    config: ProcessorConfig,
    handles: Arc<Handles>,
    workers: HashMap<(String, i32), PartitionWorker>,
}

impl EventProcessor {
    /// Processor over the given collaborators.
    #[must_use]
    pub fn new(
        config: ProcessorConfig,
        store: Arc<dyn RecordStore>,
        locks: Arc<dyn LockCoordinator>,
        bus: Arc<dyn EventBus>,
        router: CommandRouter,
        emitter: ResponseEmitter,
    ) -> Self {
        Self {
            config,
            handles: Arc::new(Handles {
                store,
                locks,
                bus,
                router,
                emitter,
            }),
            workers: HashMap::new(),
        }
    }

    /// Run the processor on a background task until `shutdown` fires.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run until `shutdown` fires, then drain the partition workers.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let topic = self.config.command_topic.clone();
        let topics = [topic.as_str()];
        tracing::info!(topic = %topic, "Event processor started");

        let mut attempt = 0usize;
        loop {
            let subscribed = tokio::select! {
                _ = shutdown.recv() => break,
                result = self.handles.bus.subscribe(&topics) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    attempt = 0;
                    tracing::info!(topic = %topic, "Subscribed to command topic");
                    if self.consume(&mut stream, &mut shutdown).await {
                        break;
                    }
                    tracing::warn!(topic = %topic, "Command stream ended");
                }
                Err(e) => {
                    tracing::error!(topic = %topic, error = %e, "Failed to subscribe");
                }
            }

            let delay = self.config.reconnect.jittered_delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            tracing::info!(topic = %topic, attempt, ?delay, "Resubscribing after backoff");
            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.drain().await;
        tracing::info!(topic = %topic, "Event processor stopped");
    }

    /// Feed messages to workers. Returns `true` if shutdown was requested.
    async fn consume(
        &mut self,
        stream: &mut EventStream,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        loop {
            tokio::select! {
                _ = shutdown.recv() => return true,
                next = stream.next() => match next {
                    Some(Ok(message)) => self.route(message).await,
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Error receiving from command stream");
                    }
                    None => return false,
                },
            }
        }
    }

    async fn route(&mut self, message: BusMessage) {
        let key = (message.topic.clone(), message.partition);
        let worker = self
            .workers
            .entry(key.clone())
            .or_insert_with(|| spawn_worker(&key, &self.handles, self.config.partition_buffer));

        let sent = worker.sender.send(message).await;
        if let Err(mpsc::error::SendError(message)) = sent {
            // The worker only stops when its channel closes, so this is a
            // crashed handler task. Replace it and retry once.
            tracing::error!(
                topic = %key.0,
                partition = key.1,
                offset = message.offset,
                "Partition worker stopped unexpectedly, restarting"
            );
            let replacement = spawn_worker(&key, &self.handles, self.config.partition_buffer);
            if replacement.sender.send(message).await.is_err() {
                tracing::error!(topic = %key.0, partition = key.1, "Restarted worker rejected event");
            }
            self.workers.insert(key, replacement);
        }
    }

    async fn drain(&mut self) {
        let deadline = Instant::now() + self.config.shutdown_timeout;
        let workers: Vec<_> = self.workers.drain().collect();
        tracing::info!(workers = workers.len(), "Draining partition workers");

        for ((topic, partition), worker) in workers {
            drop(worker.sender);
            let mut handle = worker.handle;
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(topic = %topic, partition, error = %e, "Partition worker failed");
                }
                Err(_) => {
                    handle.abort();
                    tracing::warn!(
                        topic = %topic,
                        partition,
                        "Partition worker did not drain before the shutdown timeout"
                    );
                }
            }
        }
    }
}

fn spawn_worker(key: &(String, i32), handles: &Arc<Handles>, buffer: usize) -> PartitionWorker {
    let (sender, mut receiver) = mpsc::channel::<BusMessage>(buffer.max(1));
    let handles = Arc::clone(handles);
    let (topic, partition) = key.clone();

    let handle = tokio::spawn(async move {
        tracing::debug!(topic = %topic, partition, "Partition worker started");
        while let Some(message) = receiver.recv().await {
            handles.handle(&message).await;
            if let Err(e) = handles.bus.commit(&message).await {
                tracing::warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Failed to commit handled message (it may be redelivered)"
                );
            }
        }
        tracing::debug!(topic = %topic, partition, "Partition worker stopped");
    });

    PartitionWorker { sender, handle }
}

impl Handles {
    /// Answer one consumed message. Undecodable payloads get no response.
    async fn handle(&self, message: &BusMessage) {
        let event = match DomainEvent::from_slice(&message.payload) {
            Ok(event) => event,
            Err(e) => {
                CommandMetrics::record_undecodable();
                tracing::warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Skipping undecodable event"
                );
                return;
            }
        };

        let response = self
            .router
            .dispatch(self.store.as_ref(), self.locks.as_ref(), &event)
            .await;
        // Publish failures are logged and counted by the emitter; the event
        // is not retried.
        let _ = self.emitter.publish(self.bus.as_ref(), &response).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use inventory_cmd_core::CommandResponse;
    use inventory_cmd_testing::{
        InMemoryEventBus, InMemoryLockCoordinator, InMemoryRecordStore, fixtures,
    };

    const COMMANDS: &str = "inventory.command";
    const RESPONSES: &str = "inventory.response";

    struct Harness {
        bus: InMemoryEventBus,
        store: InMemoryRecordStore,
        shutdown: broadcast::Sender<()>,
        handle: JoinHandle<()>,
    }

    fn start(bus: InMemoryEventBus) -> Harness {
        let store = InMemoryRecordStore::new();
        let mut config = ProcessorConfig::new(COMMANDS);
        config.reconnect = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(5))
            .max_delay(Duration::from_millis(20))
            .build();

        let processor = EventProcessor::new(
            config,
            Arc::new(store.clone()),
            Arc::new(InMemoryLockCoordinator::new()),
            Arc::new(bus.clone()),
            CommandRouter::default(),
            ResponseEmitter::new(RESPONSES, "inventory.service.response", 3),
        );
        let (shutdown, rx) = broadcast::channel(1);
        let handle = processor.spawn(rx);
        Harness {
            bus,
            store,
            shutdown,
            handle,
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn publish(bus: &InMemoryEventBus, event: &DomainEvent) {
        bus.publish(COMMANDS, &event.correlation_id.to_string(), &event.to_vec().unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn answers_each_event_once() {
        let h = start(InMemoryEventBus::with_partitions(4));
        wait_for(|| h.bus.subscriber_count() == 1).await;

        let items: Vec<_> = (0..8u8).map(|i| fixtures::item(f64::from(i))).collect();
        for item in &items {
            publish(&h.bus, &fixtures::insert_event(item)).await;
        }

        wait_for(|| h.bus.messages(RESPONSES).len() == items.len()).await;
        assert_eq!(h.store.len(), items.len());

        // One commit per event, and each partition ends at its log end.
        wait_for(|| h.bus.commit_count() == items.len()).await;
        let committed: i64 = (0..4)
            .filter_map(|p| h.bus.committed_offset(COMMANDS, p))
            .sum();
        assert_eq!(committed, 8);

        h.shutdown.send(()).unwrap();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn undecodable_payloads_are_skipped() {
        let h = start(InMemoryEventBus::new());
        wait_for(|| h.bus.subscriber_count() == 1).await;

        h.bus.publish(COMMANDS, "junk", b"not json").await.unwrap();
        let mut opaque_correlation =
            serde_json::to_value(fixtures::insert_event(&fixtures::item(1.0))).unwrap();
        opaque_correlation["correlationID"] = serde_json::Value::from("req-42");
        h.bus
            .publish(COMMANDS, "req-42", &serde_json::to_vec(&opaque_correlation).unwrap())
            .await
            .unwrap();
        let event = fixtures::insert_event(&fixtures::item(1.0));
        publish(&h.bus, &event).await;

        wait_for(|| h.bus.messages(RESPONSES).len() == 1).await;
        let response: CommandResponse =
            serde_json::from_slice(&h.bus.messages(RESPONSES)[0].payload).unwrap();
        assert_eq!(response.event_id, event.event_id);
        wait_for(|| h.bus.committed_offset(COMMANDS, 0) == Some(3)).await;
        assert_eq!(h.store.len(), 1);

        h.shutdown.send(()).unwrap();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn resubscribes_after_stream_loss() {
        let h = start(InMemoryEventBus::new());
        wait_for(|| h.bus.subscriber_count() == 1).await;

        h.bus.disconnect_subscribers();
        wait_for(|| h.bus.subscriber_count() == 1).await;

        publish(&h.bus, &fixtures::insert_event(&fixtures::item(1.0))).await;
        wait_for(|| h.bus.messages(RESPONSES).len() == 1).await;

        h.shutdown.send(()).unwrap();
        h.handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_drains_queued_events() {
        let bus = InMemoryEventBus::new();
        let store = InMemoryRecordStore::new().with_read_delay(Duration::from_millis(20));
        let processor = EventProcessor::new(
            ProcessorConfig::new(COMMANDS),
            Arc::new(store.clone()),
            Arc::new(InMemoryLockCoordinator::new()),
            Arc::new(bus.clone()),
            CommandRouter::default(),
            ResponseEmitter::new(RESPONSES, "inventory.service.response", 3),
        );
        let (shutdown, rx) = broadcast::channel(1);
        let handle = processor.spawn(rx);
        wait_for(|| bus.subscriber_count() == 1).await;

        let item = fixtures::item(10.0);
        store.insert_one(&item).await.unwrap();
        for _ in 0..3 {
            let sale = fixtures::sale(&[(item.item_id, 1.0)]);
            publish(&bus, &fixtures::sale_event(&sale)).await;
        }
        // Give the consumer a moment to hand the events to the worker.
        tokio::time::sleep(Duration::from_millis(10)).await;

        shutdown.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(bus.messages("inventory.service.response.3").len(), 3);
        assert_eq!(store.total_weight(item.item_id), Some(7.0));
        assert_eq!(bus.committed_offset(COMMANDS, 0), Some(3));
    }

    #[tokio::test]
    async fn unfinished_events_are_not_committed_at_shutdown() {
        let bus = InMemoryEventBus::new();
        let store = InMemoryRecordStore::new().with_read_delay(Duration::from_millis(300));
        let mut config = ProcessorConfig::new(COMMANDS);
        config.shutdown_timeout = Duration::from_millis(50);
        let processor = EventProcessor::new(
            config,
            Arc::new(store.clone()),
            Arc::new(InMemoryLockCoordinator::new()),
            Arc::new(bus.clone()),
            CommandRouter::default(),
            ResponseEmitter::new(RESPONSES, "inventory.service.response", 3),
        );
        let (shutdown, rx) = broadcast::channel(1);
        let handle = processor.spawn(rx);
        wait_for(|| bus.subscriber_count() == 1).await;

        let item = fixtures::item(10.0);
        store.insert_one(&item).await.unwrap();
        for _ in 0..3 {
            let sale = fixtures::sale(&[(item.item_id, 1.0)]);
            publish(&bus, &fixtures::sale_event(&sale)).await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        shutdown.send(()).unwrap();
        handle.await.unwrap();

        let answered = bus.messages("inventory.service.response.3").len();
        assert!(answered < 3);
        let committed = bus.committed_offset(COMMANDS, 0).unwrap_or(0);
        assert_eq!(committed, i64::try_from(answered).unwrap());
    }
}
