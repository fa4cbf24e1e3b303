//! Orange RPC Transport Layer
//!
//! Moves opaque payloads between remote peers and the dispatcher. The
//! transport handles:
//! - Peer identity (one [`PeerId`] per connection)
//! - A shared inbound queue that any number of workers can receive from
//! - Per-peer send and broadcast to every connected peer
//!
//! The dispatcher only sees the [`Transport`] trait. [`PeerHub`] is the
//! in-process implementation; [`TransportServer`] puts a WebSocket listener
//! in front of a hub.

pub mod hub;
pub mod server;

use std::fmt;
use std::time::Duration;

pub use hub::{PeerHandle, PeerHub};
pub use server::{TransportConfig, TransportServer};

/// Identity of one connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl PeerId {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// A payload travelling to or from one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub peer: PeerId,
    pub payload: String,
}

impl Message {
    pub fn new(peer: PeerId, payload: impl Into<String>) -> Self {
        Self {
            peer,
            payload: payload.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("peer {0} is not connected")]
    PeerGone(PeerId),

    #[error("failed to bind listener: {0}")]
    Bind(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What the dispatcher needs from a transport. Implementations must tolerate
/// concurrent calls from every worker.
pub trait Transport: Send + Sync + 'static {
    /// Wait up to `timeout` for the next inbound message. `Ok(None)` means
    /// nothing arrived in time.
    fn receive(
        &self,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Option<Message>, TransportError>> + Send;

    /// Deliver a payload to the peer named in the message.
    fn send(
        &self,
        message: Message,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;

    /// Deliver a payload to every connected peer.
    fn broadcast(
        &self,
        payload: String,
    ) -> impl std::future::Future<Output = Result<(), TransportError>> + Send;
}
