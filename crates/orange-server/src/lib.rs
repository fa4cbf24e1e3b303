//! Orange RPC Server: dispatch core.
//!
//! Owns the worker pool that pulls envelopes off a [`Transport`], the
//! registry of in-flight calls and the monitor that watches it, and the
//! bridge that turns local events into broadcast notifications. Business
//! logic is supplied by the embedder through the [`Context`] trait.
//!
//! [`Transport`]: orange_transport::Transport

pub mod bridge;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod events;
pub mod monitor;
pub mod registry;
pub mod router;
pub mod rpc;

pub use bridge::EventBridge;
pub use config::RpcConfig;
pub use context::{Context, ContextError};
pub use dispatcher::{BusyGauge, Dispatcher, Processed, challenge_token};
pub use events::{ChannelEventSource, EventPoster, EventQueue, EventSource, EventSourceError};
#[cfg(unix)]
pub use events::{UnixEventSource, post_event};
pub use monitor::{HangMonitor, MonitorReport, MonitorStats};
pub use registry::{HungRequest, InFlight, RequestRecord, RequestRegistry};
pub use router::{Authenticator, CallError, Service, ServiceRouter};
pub use rpc::OrangeRpc;
