//! Envelope parsing and response building.

use serde_json::{Map, Value};

use crate::PROTOCOL_VERSION;
use crate::error::ProtocolError;

/// A decoded inbound call envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Correlation token, echoed back untouched. Always a scalar.
    pub id: Value,
    pub method: String,
    /// Method-specific params; `Null` when the client sent none.
    pub params: Value,
}

/// Decode a raw inbound payload into an [`Envelope`].
///
/// Fails when the payload is not a JSON object, when `id` is missing or not a
/// scalar, or when `method` is missing or not a string. Params are not
/// inspected here.
pub fn parse_envelope(raw: &str) -> Result<Envelope, ProtocolError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ProtocolError::envelope(e.to_string()))?;
    Envelope::from_value(value)
}

impl Envelope {
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut map) = value else {
            return Err(ProtocolError::envelope("top level is not an object"));
        };

        let id = match map.remove("id") {
            Some(id @ (Value::Number(_) | Value::String(_) | Value::Bool(_))) => id,
            Some(_) => return Err(ProtocolError::envelope("id is not a scalar")),
            None => return Err(ProtocolError::envelope("missing id")),
        };

        let method = match map.remove("method") {
            Some(Value::String(method)) => method,
            Some(_) => return Err(ProtocolError::envelope("method is not a string")),
            None => return Err(ProtocolError::envelope("missing method")),
        };

        let params = map.remove("params").unwrap_or(Value::Null);

        Ok(Self { id, method, params })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response building
// ─────────────────────────────────────────────────────────────────────────────

/// An open response envelope: protocol tag and echoed id, plus at most one
/// outcome key written through [`Outcome`] or [`ResultSlot`].
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    envelope: Map<String, Value>,
}

impl ResponseBuilder {
    pub fn open(id: Value) -> Self {
        let mut envelope = Map::new();
        envelope.insert("jsonrpc".into(), Value::String(PROTOCOL_VERSION.into()));
        envelope.insert("id".into(), id);
        Self { envelope }
    }

    /// Hand out the right to write one outcome key.
    pub fn outcome(&mut self) -> Outcome<'_> {
        Outcome {
            envelope: &mut self.envelope,
        }
    }

    /// Open the `result` key as an empty table and hand out the right to fill it.
    pub fn result_slot(&mut self) -> ResultSlot<'_> {
        let value = self
            .envelope
            .entry("result")
            .or_insert_with(|| Value::Object(Map::new()));
        ResultSlot { value }
    }

    /// Whether a `result` or `error` key has been written.
    pub fn has_outcome(&self) -> bool {
        self.envelope.contains_key("result") || self.envelope.contains_key("error")
    }

    /// Close the envelope into its wire form.
    pub fn close(self) -> String {
        Value::Object(self.envelope).to_string()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.envelope)
    }
}

/// Write capability for a single outcome key. Writing consumes it.
#[derive(Debug)]
pub struct Outcome<'a> {
    envelope: &'a mut Map<String, Value>,
}

impl Outcome<'_> {
    pub fn result(self, value: Value) {
        self.envelope.insert("result".into(), value);
    }

    pub fn error(self, value: Value) {
        self.envelope.insert("error".into(), value);
    }
}

/// Write capability scoped to an already opened `result` key.
#[derive(Debug)]
pub struct ResultSlot<'a> {
    value: &'a mut Value,
}

impl ResultSlot<'_> {
    /// Add one entry to the result table.
    pub fn insert(&mut self, key: impl Into<String>, entry: Value) {
        if let Value::Object(table) = &mut *self.value {
            table.insert(key.into(), entry);
        }
    }
}
