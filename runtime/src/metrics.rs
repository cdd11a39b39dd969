//! Prometheus metrics for the command processor.
//!
//! Metric names:
//! - `inventory_cmd_commands_total{action,outcome}`: handled commands
//! - `inventory_cmd_command_duration_seconds{action}`: router → response latency
//! - `inventory_cmd_undecodable_events_total`: envelopes that could not be decoded
//! - `inventory_cmd_lock_timeouts_total`: item locks not acquired in time
//! - `inventory_cmd_lock_wait_duration_seconds`: time spent acquiring item locks
//! - `inventory_cmd_lock_release_failures_total`: item locks left to expire by TTL
//! - `inventory_cmd_responses_published_total` / `inventory_cmd_response_publish_errors_total`
//!
//! # Example
//!
//! ```rust,no_run
//! use inventory_cmd_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping. Must be
/// started from within a Tokio runtime; the HTTP listener runs as a spawned
/// task.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder and start the HTTP listener.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or its listener cannot bind.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), the call
    /// succeeds without a handle and the existing recorder keeps collecting.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();
        let addr = self.addr;

        if let Err(e) = metrics::set_global_recorder(recorder) {
            tracing::warn!(error = %e, "Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!(addr = %addr, "Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "inventory_cmd_commands_total",
        "Commands handled, labelled by action and outcome"
    );
    describe_histogram!(
        "inventory_cmd_command_duration_seconds",
        "Time from classification to response, labelled by action"
    );
    describe_counter!(
        "inventory_cmd_undecodable_events_total",
        "Consumed messages that were not valid domain events"
    );
    describe_counter!(
        "inventory_cmd_lock_timeouts_total",
        "Item locks not acquired within the configured wait"
    );
    describe_histogram!(
        "inventory_cmd_lock_wait_duration_seconds",
        "Time spent acquiring item locks"
    );
    describe_counter!(
        "inventory_cmd_lock_release_failures_total",
        "Item locks that could not be released and were left to expire"
    );
    describe_counter!(
        "inventory_cmd_responses_published_total",
        "Responses published to the event log"
    );
    describe_counter!(
        "inventory_cmd_response_publish_errors_total",
        "Responses that could not be published"
    );
}

/// Command handling metrics recorder.
pub struct CommandMetrics;

impl CommandMetrics {
    /// Record a handled command.
    pub fn record_command(action: &'static str, outcome: &'static str, duration: Duration) {
        counter!("inventory_cmd_commands_total", "action" => action, "outcome" => outcome)
            .increment(1);
        histogram!("inventory_cmd_command_duration_seconds", "action" => action)
            .record(duration.as_secs_f64());
    }

    /// Record a message that did not decode into a domain event.
    pub fn record_undecodable() {
        counter!("inventory_cmd_undecodable_events_total").increment(1);
    }
}

/// Item lock metrics recorder.
pub struct LockMetrics;

impl LockMetrics {
    /// Record how long an acquisition attempt took, successful or not.
    pub fn record_wait(duration: Duration) {
        histogram!("inventory_cmd_lock_wait_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an acquisition that gave up.
    pub fn record_timeout() {
        counter!("inventory_cmd_lock_timeouts_total").increment(1);
    }

    /// Record a lease that stayed held after every release attempt failed.
    pub fn record_release_failure() {
        counter!("inventory_cmd_lock_release_failures_total").increment(1);
    }
}

/// Response publishing metrics recorder.
pub struct ResponseMetrics;

impl ResponseMetrics {
    /// Record a published response.
    pub fn record_publish() {
        counter!("inventory_cmd_responses_published_total").increment(1);
    }

    /// Record a response that could not be published.
    pub fn record_publish_error() {
        counter!("inventory_cmd_response_publish_errors_total").increment(1);
    }
}
