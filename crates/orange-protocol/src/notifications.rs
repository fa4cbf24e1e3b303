//! Broadcast notifications and the event records they are built from.
//!
//! Notifications are server-to-client messages with no `id`; that absence is
//! what tells a client it is not looking at a call response.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::PROTOCOL_VERSION;

/// Outbound notification envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: PROTOCOL_VERSION.into(),
            method: method.into(),
            params,
        }
    }

    pub fn to_wire(&self) -> String {
        serde_json::json!({
            "jsonrpc": self.jsonrpc,
            "method": self.method,
            "params": self.params,
        })
        .to_string()
    }
}

/// Build the wire form of a notification for event `name`.
pub fn build_notification(name: &str, payload: &Value) -> String {
    Notification::new(name, payload.clone()).to_wire()
}

/// One event taken off a local event source.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub payload: Value,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// The `[name, payload]` record form understood by [`parse_event_record`].
    pub fn to_record(&self) -> Value {
        Value::Array(vec![Value::String(self.name.clone()), self.payload.clone()])
    }
}

/// Decode an event record `[name, payload]`.
///
/// Returns `None` for anything else: empty records, wrong arity, or a name
/// that is not a non-empty string.
pub fn parse_event_record(record: &Value) -> Option<Event> {
    let Value::Array(items) = record else {
        return None;
    };
    match items.as_slice() {
        [Value::String(name), payload] if !name.is_empty() => {
            Some(Event::new(name.clone(), payload.clone()))
        }
        _ => None,
    }
}
