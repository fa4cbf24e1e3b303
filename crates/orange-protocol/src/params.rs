//! Positional parameter decoding.
//!
//! Params travel as ordered tuples, not named fields. Each decoder checks the
//! exact arity and the type of every slot; any mismatch rejects the whole
//! call. Decoded values borrow from the envelope.

use serde_json::{Map, Value};

use crate::error::ProtocolError;
use crate::methods::LIST_WILDCARD;

/// `call` params: `[session-id, object, method, args]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallParams<'a> {
    pub sid: &'a str,
    pub object: &'a str,
    pub method: &'a str,
    pub args: &'a Map<String, Value>,
}

impl CallParams<'_> {
    /// Composite `object.method` name used to track the call while in flight.
    pub fn composite_name(&self) -> String {
        format!("{}.{}", self.object, self.method)
    }
}

/// `list` params: `[session-id]` or `[session-id, path]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListParams<'a> {
    pub sid: &'a str,
    pub path: &'a str,
}

/// `login` params: `[username, challenge-response]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginParams<'a> {
    pub username: &'a str,
    pub proof: &'a str,
}

pub fn parse_call_params(params: &Value) -> Result<CallParams<'_>, ProtocolError> {
    let items = tuple(params, 4, 4)?;
    let args = match &items[3] {
        Value::Object(args) => args,
        _ => return Err(ProtocolError::params("slot 3 (args) is not a table")),
    };
    Ok(CallParams {
        sid: string_at(items, 0)?,
        object: string_at(items, 1)?,
        method: string_at(items, 2)?,
        args,
    })
}

pub fn parse_list_params(params: &Value) -> Result<ListParams<'_>, ProtocolError> {
    let items = tuple(params, 1, 2)?;
    let path = match items.get(1) {
        Some(_) => string_at(items, 1)?,
        None => LIST_WILDCARD,
    };
    Ok(ListParams {
        sid: string_at(items, 0)?,
        path,
    })
}

pub fn parse_login_params(params: &Value) -> Result<LoginParams<'_>, ProtocolError> {
    let items = tuple(params, 2, 2)?;
    Ok(LoginParams {
        username: string_at(items, 0)?,
        proof: string_at(items, 1)?,
    })
}

/// Session-only params: `[session-id]`. Used by `logout`.
pub fn parse_authenticate_params(params: &Value) -> Result<&str, ProtocolError> {
    let items = tuple(params, 1, 1)?;
    string_at(items, 0)
}

fn tuple(params: &Value, min: usize, max: usize) -> Result<&[Value], ProtocolError> {
    let Value::Array(items) = params else {
        return Err(ProtocolError::params("params is not a tuple"));
    };
    if items.len() < min || items.len() > max {
        return Err(ProtocolError::params(format!(
            "expected {min}..={max} params, got {}",
            items.len()
        )));
    }
    Ok(items)
}

fn string_at(items: &[Value], index: usize) -> Result<&str, ProtocolError> {
    items
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::params(format!("slot {index} is not a string")))
}
