//! Wiring from [`Config`] to a running [`EventProcessor`].
//!
//! Two steps:
//! 1. [`Resources::connect`] opens the record store (running migrations), the
//!    lock coordinator, and the event bus
//! 2. [`Application::new`] assembles router, emitter, and processor over
//!    those resources, and [`Application::run_until`] runs them until a
//!    shutdown signal resolves

use crate::config::Config;
use inventory_cmd_core::{EventBus, LockCoordinator, RecordStore};
use inventory_cmd_postgres::PostgresRecordStore;
use inventory_cmd_redis::RedisLockCoordinator;
use inventory_cmd_redpanda::RedpandaEventBus;
use inventory_cmd_runtime::{
    CommandRouter, EventProcessor, ProcessorConfig, ResponseEmitter, StockDecrementCoordinator,
};
use sqlx::postgres::PgPoolOptions;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// Shared infrastructure handles.
#[derive(Clone)]
pub struct Resources {
    /// Materialized inventory records
    pub store: Arc<dyn RecordStore>,
    /// Per-item mutual exclusion
    pub locks: Arc<dyn LockCoordinator>,
    /// Inbound events and outbound responses
    pub bus: Arc<dyn EventBus>,
}

impl Resources {
    /// Connect to `PostgreSQL`, Redis, and Redpanda.
    ///
    /// # Errors
    ///
    /// Returns an error if any backend is unreachable or the migrations fail.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        info!("Connecting to record store...");
        let options = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .min_connections(config.postgres.min_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .idle_timeout(Duration::from_secs(config.postgres.idle_timeout));
        let store = PostgresRecordStore::connect_with(options, &config.postgres.url).await?;
        store.migrate().await?;
        info!("Record store connected");

        info!("Connecting to lock coordinator...");
        let locks = RedisLockCoordinator::new(&config.redis.url, config.lock_ttl()).await?;
        info!("Lock coordinator connected");

        info!("Connecting to Redpanda event bus...");
        let bus = RedpandaEventBus::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.consumer_group)
            .auto_offset_reset(&config.redpanda.auto_offset_reset)
            .buffer_size(config.processor.partition_buffer)
            .build()?;
        info!("Event bus connected");

        Ok(Self {
            store: Arc::new(store),
            locks: Arc::new(locks),
            bus: Arc::new(bus),
        })
    }
}

/// A fully assembled command processor.
pub struct Application {
    processor: EventProcessor,
    shutdown_tx: broadcast::Sender<()>,
}

impl Application {
    /// Assemble the processor over `resources`.
    #[must_use]
    pub fn new(config: &Config, resources: Resources) -> Self {
        let sales = StockDecrementCoordinator::new(config.lock_wait())
            .with_lock_prefix(config.redis.lock_key_prefix.clone());
        let emitter = ResponseEmitter::new(
            config.redpanda.response_topic.clone(),
            &config.redpanda.service_response_topic_prefix,
            config.redpanda.aggregate_id,
        );

        let mut processor_config = ProcessorConfig::new(config.redpanda.command_topic.clone());
        processor_config.partition_buffer = config.processor.partition_buffer;
        processor_config.shutdown_timeout = config.shutdown_timeout();

        let processor = EventProcessor::new(
            processor_config,
            resources.store,
            resources.locks,
            resources.bus,
            CommandRouter::new(sales),
            emitter,
        );
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            processor,
            shutdown_tx,
        }
    }

    /// Run until `signal` resolves, then drain in-flight events and return.
    pub async fn run_until(self, signal: impl Future<Output = ()>) {
        let handle = self.processor.spawn(self.shutdown_tx.subscribe());

        signal.await;
        info!("Shutdown requested, draining in-flight events");
        // No receivers left means the processor already stopped.
        let _ = self.shutdown_tx.send(());

        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Event processor task failed");
        }
        info!("Event processor stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use inventory_cmd_core::{CommandResponse, DomainEvent};
    use inventory_cmd_testing::{
        InMemoryEventBus, InMemoryLockCoordinator, InMemoryRecordStore, fixtures,
    };

    async fn wait_for(bus: &InMemoryEventBus, topic: &str) -> Vec<u8> {
        for _ in 0..200 {
            if let Some(message) = bus.messages(topic).into_iter().next() {
                return message.payload;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Vec::new()
    }

    #[tokio::test]
    async fn answers_commands_until_shutdown() {
        let config = Config::from_lookup(|_| None).unwrap();
        let store = InMemoryRecordStore::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let resources = Resources {
            store: Arc::new(store.clone()),
            locks: Arc::new(InMemoryLockCoordinator::new()),
            bus: bus.clone(),
        };

        let item = fixtures::item(12.5);
        let event: DomainEvent = fixtures::insert_event(&item);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let app = Application::new(&config, resources);
        let running = tokio::spawn(app.run_until(async {
            let _ = stop_rx.await;
        }));

        // Give the processor a moment to subscribe before publishing.
        while bus.subscriber_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        bus.publish(
            &config.redpanda.command_topic,
            &event.correlation_id.to_string(),
            &serde_json::to_vec(&event).unwrap(),
        )
        .await
        .unwrap();

        let payload = wait_for(&bus, &config.redpanda.response_topic).await;
        let response: CommandResponse = serde_json::from_slice(&payload).unwrap();
        assert_eq!(response.correlation_id, event.correlation_id);
        assert!(!response.is_error());
        assert_eq!(store.total_weight(item.item_id), Some(12.5));

        stop_tx.send(()).unwrap();
        running.await.unwrap();
    }
}
