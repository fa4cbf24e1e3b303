//! Codec errors and the method-specific error shapes written to the wire.
//!
//! The shapes differ per method: `call` and unknown methods use an object
//! with an integer code, `login` uses an object with a string code and
//! `logout` uses a flat string. Clients match on these exactly.

use serde_json::{Value, json};

/// Errno values used on the wire. Codes are sent negated.
pub mod errno {
    pub const ENOENT: i64 = 2;
    pub const EINVAL: i64 = 22;
}

/// Failure to decode an inbound envelope or its parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("malformed params: {0}")]
    MalformedParams(String),
}

impl ProtocolError {
    pub fn envelope(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope(reason.into())
    }

    pub fn params(reason: impl Into<String>) -> Self {
        Self::MalformedParams(reason.into())
    }
}

/// Builders for the `error` values the dispatcher writes itself.
pub struct WireError;

impl WireError {
    /// `call` whose params are not `[sid, object, method, args]`.
    pub fn invalid_call_format() -> Value {
        json!({ "code": -errno::EINVAL, "str": "Invalid call message format!" })
    }

    /// Method name outside the five known kinds.
    pub fn invalid_method() -> Value {
        json!({ "code": -errno::EINVAL, "str": "Invalid Method" })
    }

    /// `login` rejected by the context.
    pub fn access_denied() -> Value {
        json!({ "code": "EACCESS" })
    }

    /// `login` whose params are not `[username, proof]`.
    pub fn invalid_login() -> Value {
        json!({ "code": "EINVAL" })
    }

    /// Any `logout` failure. A bare string, unlike every other error.
    pub fn logout_failed() -> Value {
        Value::String("Could not logout!".into())
    }
}
