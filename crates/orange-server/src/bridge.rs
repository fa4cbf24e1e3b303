//! Event bridge: local events out to every connected peer.

use std::sync::Arc;
use std::time::Duration;

use orange_protocol::{build_notification, parse_event_record};
use orange_transport::{Transport, TransportError};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::events::{EventQueue, EventSource, EventSourceError};

/// Pause after a failed receive before trying again.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Consecutive receive failures after which the bridge gives up.
pub const MAX_RECV_FAILURES: u32 = 5;

pub struct EventBridge<T> {
    transport: Arc<T>,
    retry_delay: Duration,
}

impl<T> Clone for EventBridge<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            retry_delay: self.retry_delay,
        }
    }
}

impl<T: Transport> EventBridge<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Broadcast `name` with `payload` as a notification to all peers.
    pub async fn broadcast_event(&self, name: &str, payload: &Value) -> Result<(), TransportError> {
        self.transport.broadcast(build_notification(name, payload)).await
    }

    /// Pump events from `source` until shutdown or until the source closes.
    ///
    /// If the source cannot be opened the bridge gives up for good: calls
    /// keep working, broadcasts do not.
    pub async fn run<S: EventSource>(self, source: S, mut shutdown: watch::Receiver<bool>) {
        let mut queue = match source.open().await {
            Ok(queue) => queue,
            Err(e) => {
                error!("Unable to open local event queue, broadcast events disabled: {e}");
                return;
            }
        };
        info!("local event queue listener started");

        let mut failures = 0u32;
        while !*shutdown.borrow() {
            let record = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                record = queue.recv() => record,
            };

            if record.is_ok() {
                failures = 0;
            }
            match record {
                Ok(Some(record)) => match parse_event_record(&record) {
                    Some(event) => {
                        if let Err(e) = self.broadcast_event(&event.name, &event.payload).await {
                            warn!(event = %event.name, "broadcast failed: {e}");
                        }
                    }
                    None => debug!("skipping malformed event record"),
                },
                Ok(None) => {}
                Err(EventSourceError::Closed) => {
                    info!("local event source closed");
                    break;
                }
                Err(e) => {
                    failures += 1;
                    if failures >= MAX_RECV_FAILURES {
                        error!("event receive failed {failures} times in a row, giving up: {e}");
                        break;
                    }
                    warn!("event receive failed: {e}");
                    tokio::select! {
                        _ = tokio::time::sleep(self.retry_delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        queue.close().await;
        debug!("local event queue listener exiting");
    }
}
