//! Local event sources feeding the event bridge.
//!
//! A source is opened once; the queue it yields hands out raw event records
//! (`[name, payload]`), which the bridge validates. Two sources ship here: an
//! in-process channel and, on Unix, a datagram socket that other local
//! processes post JSON records to.

use serde_json::Value;
use tokio::sync::mpsc;

use orange_protocol::Event;

#[derive(Debug, thiserror::Error)]
pub enum EventSourceError {
    #[error("failed to open event source: {0}")]
    Open(String),

    #[error("event source closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Something the bridge can open to get an [`EventQueue`].
pub trait EventSource: Send + 'static {
    type Queue: EventQueue;

    fn open(self) -> impl std::future::Future<Output = Result<Self::Queue, EventSourceError>> + Send;
}

pub trait EventQueue: Send + 'static {
    /// Wait for the next record. `Ok(None)` is an empty or undecodable record;
    /// `Err(Closed)` means no more records will ever arrive.
    fn recv(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Option<Value>, EventSourceError>> + Send;

    fn close(self) -> impl std::future::Future<Output = ()> + Send
    where
        Self: Sized,
    {
        async {}
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// In-process channel
// ─────────────────────────────────────────────────────────────────────────────

pub struct ChannelEventSource {
    rx: mpsc::UnboundedReceiver<Value>,
}

/// Posting side of a [`ChannelEventSource`]. Cheap to clone.
#[derive(Clone)]
pub struct EventPoster {
    tx: mpsc::UnboundedSender<Value>,
}

impl ChannelEventSource {
    pub fn new() -> (Self, EventPoster) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { rx }, EventPoster { tx })
    }
}

impl EventPoster {
    pub fn post(&self, name: &str, payload: Value) -> Result<(), EventSourceError> {
        self.post_record(Event::new(name, payload).to_record())
    }

    /// Post a raw record, valid or not.
    pub fn post_record(&self, record: Value) -> Result<(), EventSourceError> {
        self.tx.send(record).map_err(|_| EventSourceError::Closed)
    }
}

pub struct ChannelEventQueue {
    rx: mpsc::UnboundedReceiver<Value>,
}

impl EventSource for ChannelEventSource {
    type Queue = ChannelEventQueue;

    async fn open(self) -> Result<Self::Queue, EventSourceError> {
        Ok(ChannelEventQueue { rx: self.rx })
    }
}

impl EventQueue for ChannelEventQueue {
    async fn recv(&mut self) -> Result<Option<Value>, EventSourceError> {
        match self.rx.recv().await {
            Some(record) => Ok(Some(record)),
            None => Err(EventSourceError::Closed),
        }
    }

    async fn close(mut self) {
        self.rx.close();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unix datagram socket
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(unix)]
pub use unix::{UnixEventQueue, UnixEventSource, post_event};

#[cfg(unix)]
mod unix {
    use std::os::unix::fs::FileTypeExt;
    use std::path::{Path, PathBuf};

    use serde_json::Value;
    use tokio::net::UnixDatagram;
    use tracing::debug;

    use super::{EventQueue, EventSource, EventSourceError};
    use orange_protocol::Event;

    const MAX_RECORD: usize = 64 * 1024;

    /// Datagram socket bound at `path`; one JSON record per datagram.
    pub struct UnixEventSource {
        path: PathBuf,
    }

    impl UnixEventSource {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    pub struct UnixEventQueue {
        socket: UnixDatagram,
        path: PathBuf,
        buf: Vec<u8>,
    }

    impl EventSource for UnixEventSource {
        type Queue = UnixEventQueue;

        async fn open(self) -> Result<Self::Queue, EventSourceError> {
            // A socket file left by an earlier run blocks the bind. Anything
            // else at the path is not ours to remove.
            if let Ok(meta) = std::fs::symlink_metadata(&self.path) {
                if !meta.file_type().is_socket() {
                    return Err(EventSourceError::Open(format!(
                        "{}: exists and is not a socket",
                        self.path.display()
                    )));
                }
                std::fs::remove_file(&self.path).map_err(|e| {
                    EventSourceError::Open(format!("{}: {e}", self.path.display()))
                })?;
            }
            let socket = UnixDatagram::bind(&self.path)
                .map_err(|e| EventSourceError::Open(format!("{}: {e}", self.path.display())))?;
            debug!(path = %self.path.display(), "local event queue opened");
            Ok(UnixEventQueue {
                socket,
                path: self.path,
                buf: vec![0; MAX_RECORD],
            })
        }
    }

    impl EventQueue for UnixEventQueue {
        async fn recv(&mut self) -> Result<Option<Value>, EventSourceError> {
            let len = self.socket.recv(&mut self.buf).await?;
            if len == 0 {
                return Ok(None);
            }
            match serde_json::from_slice(&self.buf[..len]) {
                Ok(record) => Ok(Some(record)),
                Err(e) => {
                    debug!("undecodable event record: {e}");
                    Ok(None)
                }
            }
        }

        async fn close(self) {
            drop(self.socket);
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!(path = %self.path.display(), "could not remove event socket: {e}");
            }
        }
    }

    /// Post one event to the queue listening at `path`.
    pub async fn post_event(
        path: impl AsRef<Path>,
        name: &str,
        payload: Value,
    ) -> Result<(), EventSourceError> {
        let record = Event::new(name, payload).to_record().to_string();
        let socket = UnixDatagram::unbound()?;
        socket.send_to(record.as_bytes(), path.as_ref()).await?;
        Ok(())
    }
}
