//! Orange RPC - Protocol Codec
//!
//! JSON-RPC 2.0 flavoured envelopes for the Orange remote-call protocol.
//! This crate owns the wire contract: envelope parsing, positional parameter
//! decoding, response and notification building, and the per-method error
//! shapes that existing clients depend on.

pub mod error;
pub mod jsonrpc;
pub mod methods;
pub mod notifications;
pub mod params;

pub use error::{ProtocolError, WireError, errno};
pub use jsonrpc::{Envelope, Outcome, ResponseBuilder, ResultSlot, parse_envelope};
pub use methods::Methods;
pub use notifications::{Event, Notification, build_notification, parse_event_record};
pub use params::{
    CallParams, ListParams, LoginParams, parse_authenticate_params, parse_call_params,
    parse_list_params, parse_login_params,
};

/// Protocol tag carried by every outbound envelope.
pub const PROTOCOL_VERSION: &str = "2.0";
