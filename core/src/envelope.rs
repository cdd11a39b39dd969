//! Wire envelopes: the inbound [`DomainEvent`] and the outbound [`CommandResponse`].
//!
//! Both travel as JSON. Byte fields (`data`, `result`) are base64 strings, the
//! same encoding the upstream producer uses for raw byte slices.

use crate::error::CommandError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An inbound command describing a requested inventory mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Primary action (`insert`, `update`, `delete`). Kept as a string so an
    /// unknown action still decodes and can be answered with an error.
    pub action: String,

    /// Optional sub-action, e.g. `createSale`.
    #[serde(rename = "serviceAction", default, skip_serializing_if = "Option::is_none")]
    pub service_action: Option<String>,

    /// Routing key for the aggregate type.
    #[serde(rename = "aggregateID")]
    pub aggregate_id: i32,

    /// Caller-supplied token, echoed verbatim on the response.
    ///
    /// Must be a UUID string. Anything else makes the whole envelope
    /// undecodable, and an undecodable event is skipped without a response,
    /// since there would be no correlation ID to answer under.
    #[serde(rename = "correlationID")]
    pub correlation_id: Uuid,

    /// Unique per event.
    #[serde(rename = "eventID")]
    pub event_id: Uuid,

    /// Command payload.
    #[serde(with = "base64_bytes", default)]
    pub data: Vec<u8>,

    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    /// Build an event with fresh event and correlation IDs.
    #[must_use]
    pub fn new(action: impl Into<String>, aggregate_id: i32, data: Vec<u8>) -> Self {
        Self {
            action: action.into(),
            service_action: None,
            aggregate_id,
            correlation_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Attach a service action.
    #[must_use]
    pub fn with_service_action(mut self, service_action: impl Into<String>) -> Self {
        self.service_action = Some(service_action.into());
        self
    }

    /// Decode an event from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns the underlying decode error if `bytes` is not a valid envelope.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encode to the JSON wire form.
    ///
    /// # Errors
    ///
    /// Serialization of this type does not fail in practice; the error is
    /// propagated for completeness.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Kind of failure carried on a response. Serialized as an integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Validation, classification, decode, lock, and stock failures.
    InternalError,
    /// Record store I/O failures.
    DatabaseError,
}

impl ErrorCode {
    /// Integer wire value.
    #[must_use]
    pub const fn as_i16(self) -> i16 {
        match self {
            Self::InternalError => 1,
            Self::DatabaseError => 2,
        }
    }

    /// Parse an integer wire value.
    #[must_use]
    pub const fn from_i16(code: i16) -> Option<Self> {
        match code {
            1 => Some(Self::InternalError),
            2 => Some(Self::DatabaseError),
            _ => None,
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i16(self.as_i16())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i16::deserialize(deserializer)?;
        Self::from_i16(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error code {code}")))
    }
}

/// The single outbound reply to a consumed [`DomainEvent`].
///
/// Exactly one of `result` or `error` is populated.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Echo of the event's aggregate ID.
    #[serde(rename = "aggregateID")]
    pub aggregate_id: i32,

    /// Echo of the event's correlation ID.
    #[serde(rename = "correlationID")]
    pub correlation_id: Uuid,

    /// Echo of the event's ID.
    #[serde(rename = "eventID")]
    pub event_id: Uuid,

    /// Echo of the event's action.
    #[serde(rename = "eventAction")]
    pub event_action: String,

    /// Echo of the event's service action.
    #[serde(rename = "serviceAction", default, skip_serializing_if = "Option::is_none")]
    pub service_action: Option<String>,

    /// Encoded success body.
    #[serde(
        with = "base64_bytes_opt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Vec<u8>>,

    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Failure kind.
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl CommandResponse {
    /// Successful response to `event` carrying `result`.
    #[must_use]
    pub fn success(event: &DomainEvent, result: Vec<u8>) -> Self {
        Self {
            result: Some(result),
            ..Self::echo(event)
        }
    }

    /// Failed response to `event` describing `error`.
    #[must_use]
    pub fn failure(event: &DomainEvent, error: &CommandError) -> Self {
        Self {
            error: Some(error.to_string()),
            error_code: Some(error.code()),
            ..Self::echo(event)
        }
    }

    /// Whether this response reports a failure.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error_code.is_some()
    }

    /// Encode to the JSON wire form.
    ///
    /// # Errors
    ///
    /// Propagates the serializer error, which does not occur for this type in
    /// practice.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    fn echo(event: &DomainEvent) -> Self {
        Self {
            aggregate_id: event.aggregate_id,
            correlation_id: event.correlation_id,
            event_id: event.event_id,
            event_action: event.action.clone(),
            service_action: event.service_action.clone(),
            result: None,
            error: None,
            error_code: None,
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_opt {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)] // serde `with` hands us `&Option<T>`
    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom))
            .transpose()
    }
}
