//! In-process peer hub.
//!
//! Every peer pushes into one shared inbound queue; every peer owns its own
//! outbound queue. Workers race on the inbound queue, so messages from
//! different peers may be handled out of arrival order.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::{Message, PeerId, Transport, TransportError};

const INBOUND_CAPACITY: usize = 1024;

struct HubInner {
    inbound_tx: mpsc::Sender<Message>,
    inbound_rx: Mutex<mpsc::Receiver<Message>>,
    peers: DashMap<PeerId, mpsc::UnboundedSender<String>>,
    next_peer: AtomicU32,
}

/// Shared inbound queue plus a table of connected peers. Cheap to clone.
#[derive(Clone)]
pub struct PeerHub {
    inner: Arc<HubInner>,
}

impl PeerHub {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        Self {
            inner: Arc::new(HubInner {
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
                peers: DashMap::new(),
                next_peer: AtomicU32::new(1),
            }),
        }
    }

    /// Add a peer and return its id with the receiving end of its outbound queue.
    pub fn register(&self) -> (PeerId, mpsc::UnboundedReceiver<String>) {
        let peer = PeerId(self.inner.next_peer.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.peers.insert(peer, tx);
        debug!(%peer, "peer registered");
        (peer, rx)
    }

    pub fn unregister(&self, peer: PeerId) {
        if self.inner.peers.remove(&peer).is_some() {
            debug!(%peer, "peer unregistered");
        }
    }

    /// Queue an inbound payload from `peer` for the workers.
    pub async fn submit(&self, peer: PeerId, payload: String) -> Result<(), TransportError> {
        self.inner
            .inbound_tx
            .send(Message { peer, payload })
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Connect an in-process peer.
    pub fn connect(&self) -> PeerHandle {
        let (id, outbound) = self.register();
        PeerHandle {
            id,
            hub: self.clone(),
            outbound,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.inner.peers.len()
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.inner.peers.contains_key(&peer)
    }
}

impl Default for PeerHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for PeerHub {
    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        let next = async {
            let mut inbound = self.inner.inbound_rx.lock().await;
            inbound.recv().await
        };
        match tokio::time::timeout(timeout, next).await {
            Err(_) => Ok(None),
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(TransportError::Closed),
        }
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        let Some(outbound) = self.inner.peers.get(&message.peer) else {
            return Err(TransportError::PeerGone(message.peer));
        };
        outbound
            .send(message.payload)
            .map_err(|_| TransportError::PeerGone(message.peer))
    }

    async fn broadcast(&self, payload: String) -> Result<(), TransportError> {
        for peer in self.inner.peers.iter() {
            if peer.value().send(payload.clone()).is_err() {
                debug!(peer = %peer.key(), "broadcast to closed peer skipped");
            }
        }
        Ok(())
    }
}

/// An in-process peer. Unregisters itself when dropped.
pub struct PeerHandle {
    id: PeerId,
    hub: PeerHub,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl PeerHandle {
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Send a payload to the server as this peer.
    pub async fn send(&self, payload: impl Into<String>) -> Result<(), TransportError> {
        self.hub.submit(self.id, payload.into()).await
    }

    /// Next payload addressed to this peer (response or broadcast).
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        self.hub.unregister(self.id);
    }
}
