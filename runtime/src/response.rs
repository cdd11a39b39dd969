//! Response Emitter.
//!
//! Every handler outcome funnels through [`ResponseEmitter::respond`], which
//! turns it into exactly one [`CommandResponse`] carrying the triggering
//! event's identity. Expected failures (validation, stock, lock, store) become
//! a populated `error`/`errorCode`; none of them escape as a fault.
//!
//! # Topics
//!
//! - CRUD responses go to the response topic
//! - Responses to service actions (sales) go to `{prefix}.{aggregate}`, where
//!   `aggregate` is this processor's own aggregate ID
//!
//! Responses are keyed by correlation ID.

use crate::metrics::ResponseMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use inventory_cmd_core::command::ServiceAction;
use inventory_cmd_core::{
    CommandError, CommandResponse, DomainEvent, ErrorCode, EventBus, EventBusError,
};

/// Builds responses and publishes them to the right topic.
#[derive(Clone, Debug)]
pub struct ResponseEmitter {
    response_topic: String,
    service_response_topic: String,
    publish_retry: RetryPolicy,
}

impl ResponseEmitter {
    /// Emitter publishing CRUD responses to `response_topic` and service
    /// responses to `{service_topic_prefix}.{aggregate_id}`.
    #[must_use]
    pub fn new(
        response_topic: impl Into<String>,
        service_topic_prefix: &str,
        aggregate_id: i32,
    ) -> Self {
        Self {
            response_topic: response_topic.into(),
            service_response_topic: format!("{service_topic_prefix}.{aggregate_id}"),
            publish_retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for broker-side publish failures.
    #[must_use]
    pub fn with_publish_retry(mut self, policy: RetryPolicy) -> Self {
        self.publish_retry = policy;
        self
    }

    /// Successful response carrying an encoded result body.
    #[must_use]
    pub fn success(event: &DomainEvent, result: Vec<u8>) -> CommandResponse {
        CommandResponse::success(event, result)
    }

    /// Failed response describing `error`.
    #[must_use]
    pub fn failure(event: &DomainEvent, error: &CommandError) -> CommandResponse {
        CommandResponse::failure(event, error)
    }

    /// Turn a handler outcome into the event's single response, logging
    /// failures locally.
    #[must_use]
    pub fn respond(
        event: &DomainEvent,
        outcome: Result<Vec<u8>, CommandError>,
    ) -> CommandResponse {
        match outcome {
            Ok(result) => Self::success(event, result),
            Err(error) => {
                match error.code() {
                    ErrorCode::DatabaseError => tracing::error!(
                        event_id = %event.event_id,
                        correlation_id = %event.correlation_id,
                        action = %event.action,
                        error = %error,
                        "Command failed on the record store"
                    ),
                    ErrorCode::InternalError => tracing::warn!(
                        event_id = %event.event_id,
                        correlation_id = %event.correlation_id,
                        action = %event.action,
                        kind = error.kind(),
                        error = %error,
                        "Command rejected"
                    ),
                }
                Self::failure(event, &error)
            }
        }
    }

    /// Topic a response to `event` belongs on.
    #[must_use]
    pub fn topic_for(&self, event: &DomainEvent) -> &str {
        let is_service = event
            .service_action
            .as_deref()
            .and_then(ServiceAction::parse)
            .is_some();
        if is_service {
            &self.service_response_topic
        } else {
            &self.response_topic
        }
    }

    /// Topic a response belongs on, decided from the response's echoed
    /// service action.
    #[must_use]
    pub fn topic_for_response(&self, response: &CommandResponse) -> &str {
        let is_service = response
            .service_action
            .as_deref()
            .and_then(ServiceAction::parse)
            .is_some();
        if is_service {
            &self.service_response_topic
        } else {
            &self.response_topic
        }
    }

    /// Publish a response, retrying transient broker failures.
    ///
    /// # Errors
    ///
    /// Returns the last [`EventBusError`] once retries are spent.
    pub async fn publish(
        &self,
        bus: &dyn EventBus,
        response: &CommandResponse,
    ) -> Result<(), EventBusError> {
        let topic = self.topic_for_response(response);
        let key = response.correlation_id.to_string();
        let payload = response.to_vec().map_err(|e| EventBusError::PublishFailed {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;

        let result = retry_with_predicate(
            &self.publish_retry,
            || bus.publish(topic, &key, &payload),
            |e| !matches!(e, EventBusError::InvalidTopic(_)),
        )
        .await;

        match &result {
            Ok(()) => {
                ResponseMetrics::record_publish();
                tracing::debug!(
                    topic,
                    event_id = %response.event_id,
                    correlation_id = %response.correlation_id,
                    "Response published"
                );
            }
            Err(e) => {
                ResponseMetrics::record_publish_error();
                tracing::error!(
                    topic,
                    event_id = %response.event_id,
                    correlation_id = %response.correlation_id,
                    error = %e,
                    "Failed to publish response"
                );
            }
        }
        result
    }
}
