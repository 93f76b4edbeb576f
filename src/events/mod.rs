//! Application event service seam.
//!
//! This module contains:
//! - `EventService` trait: name-keyed subscribe/unsubscribe
//! - `EventHandler` trait: invoked once per event occurrence
//! - `EventPayload`: envelope around an occurrence's JSON payload
//! - Implementations: in-process channel service

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::{Map, Value};

pub mod channel;

pub use channel::ChannelEventService;

/// Result type for event service operations.
pub type Result<T> = std::result::Result<T, EventError>;

/// Errors that can occur during event service operations.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Handler for event '{event}' failed: {message}")]
    HandlerFailed { event: String, message: String },
}

/// Payload of a single event occurrence.
///
/// Producers either wrap the interesting part in a `data` field alongside
/// metadata, or emit the value directly.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Object carrying a non-null `data` field; remaining fields are metadata.
    Envelope { data: Value, meta: Map<String, Value> },
    /// Any other value.
    Bare(Value),
}

impl EventPayload {
    /// The value handed to transformers: `data` for envelopes, else the whole value.
    pub fn into_data(self) -> Value {
        match self {
            Self::Envelope { data, .. } => data,
            Self::Bare(value) => value,
        }
    }

    pub fn data(&self) -> &Value {
        match self {
            Self::Envelope { data, .. } => data,
            Self::Bare(value) => value,
        }
    }
}

impl From<Value> for EventPayload {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(mut fields) => match fields.remove("data") {
                Some(data) if !data.is_null() => Self::Envelope { data, meta: fields },
                Some(data) => {
                    fields.insert("data".to_string(), data);
                    Self::Bare(Value::Object(fields))
                }
                None => Self::Bare(Value::Object(fields)),
            },
            other => Self::Bare(other),
        }
    }
}

/// Handler for event occurrences.
pub trait EventHandler: Send + Sync {
    /// Process one occurrence. `None` means the producer emitted no payload.
    fn handle(&self, payload: Option<EventPayload>) -> BoxFuture<'static, Result<()>>;
}

/// Name-keyed publish/subscribe registry owned by the application.
#[async_trait]
pub trait EventService: Send + Sync {
    /// Register a handler for every future occurrence of `event`.
    async fn subscribe(&self, event: &str, handler: Arc<dyn EventHandler>) -> Result<()>;

    /// Drop every handler registered for `event`.
    async fn unsubscribe(&self, event: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_envelope_extracts_data() {
        let payload = EventPayload::from(json!({ "data": { "a": 1 }, "source": "api" }));

        match &payload {
            EventPayload::Envelope { meta, .. } => assert_eq!(meta["source"], "api"),
            other => panic!("expected envelope, got {:?}", other),
        }
        assert_eq!(payload.into_data(), json!({ "a": 1 }));
    }

    #[test]
    fn test_payload_without_data_is_bare() {
        let payload = EventPayload::from(json!({ "a": 1 }));
        assert_eq!(payload, EventPayload::Bare(json!({ "a": 1 })));
    }

    #[test]
    fn test_payload_null_data_is_bare() {
        let payload = EventPayload::from(json!({ "data": null, "b": 2 }));
        assert_eq!(payload.data(), &json!({ "data": null, "b": 2 }));
    }

    #[test]
    fn test_payload_scalar_is_bare() {
        assert_eq!(EventPayload::from(json!(42)).into_data(), json!(42));
    }
}
