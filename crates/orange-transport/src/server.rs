//! WebSocket transport server using Axum.
//!
//! Each WebSocket connection becomes one peer of a [`PeerHub`]. Text frames
//! (and UTF-8 binary frames) are queued for the workers as-is; responses and
//! broadcasts addressed to the peer are written back as text frames.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as WsMessage, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::hub::PeerHub;
use crate::{Message, PeerId, Transport, TransportError};

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum concurrent connections
    pub max_connections: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 5303,
            hostname: "127.0.0.1".into(),
            enable_cors: false,
            max_connections: Some(32),
        }
    }
}

/// Shared state for the connection handlers.
struct AppState {
    hub: PeerHub,
    config: TransportConfig,
    /// Connected client count (for health check)
    client_count: AtomicUsize,
}

/// The transport server. Accepts WebSocket peers and feeds them into a hub.
pub struct TransportServer {
    hub: PeerHub,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound port
    port: u16,
}

impl TransportServer {
    pub async fn start(config: TransportConfig) -> Result<Self, TransportError> {
        Self::start_with_hub(config, PeerHub::new()).await
    }

    /// Start the server in front of an existing hub, so in-process peers and
    /// WebSocket peers share one inbound queue.
    pub async fn start_with_hub(
        config: TransportConfig,
        hub: PeerHub,
    ) -> Result<Self, TransportError> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let state = Arc::new(AppState {
            hub: hub.clone(),
            config: config.clone(),
            client_count: AtomicUsize::new(0),
        });

        let mut app = Router::new()
            .route("/ws", get(ws_upgrade_handler))
            .route("/health", get(health_handler))
            .with_state(state);
        if config.enable_cors {
            app = app.layer(CorsLayer::permissive());
        }

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port)
            .parse()
            .map_err(|e| TransportError::Bind(format!("{}:{}: {e}", config.hostname, config.port)))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind(format!("{addr}: {e}")))?;
        let actual_port = listener.local_addr()?.port();

        info!("Orange RPC listening on ws://{}:{}/ws", config.hostname, actual_port);

        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = served {
                error!("WebSocket listener failed: {e}");
            }
        });

        Ok(Self {
            hub,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            port: actual_port,
        })
    }

    pub fn hub(&self) -> &PeerHub {
        &self.hub
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Gracefully stop accepting connections.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(mut handle) = self.handle.take() {
            // Open sockets hold graceful shutdown; don't wait on them forever.
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                warn!("WebSocket listener did not drain in {STOP_GRACE:?}, aborting");
                handle.abort();
            }
        }
        info!("Orange RPC transport stopped");
    }
}

impl Transport for TransportServer {
    async fn receive(&self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        self.hub.receive(timeout).await
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        self.hub.send(message).await
    }

    async fn broadcast(&self, payload: String) -> Result<(), TransportError> {
        self.hub.broadcast(payload).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if let Some(max) = state.config.max_connections {
        let current = state.client_count.load(Ordering::Relaxed);
        if current >= max {
            warn!("Connection rejected: max connections reached ({max})");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
        .into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "clients": state.client_count.load(Ordering::Relaxed),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>) {
    state.client_count.fetch_add(1, Ordering::Relaxed);

    let (peer, mut outbound_rx) = state.hub.register();
    info!("Client connected: {peer}");

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if !forward(&state.hub, peer, text.as_str().to_owned()).await {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => {
                            if !forward(&state.hub, peer, text).await {
                                break;
                            }
                        }
                        Err(_) => debug!("Dropping non UTF-8 frame from {peer}"),
                    },
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = ws_tx.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        debug!("Client disconnected: {peer}");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {peer}: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            // Responses and broadcasts addressed to this peer
            outbound = outbound_rx.recv() => {
                let Some(payload) = outbound else { break };
                if let Err(e) = ws_tx.send(WsMessage::Text(payload.into())).await {
                    error!("Failed to send to {peer}: {e}");
                    break;
                }
            }
        }
    }

    state.hub.unregister(peer);
    state.client_count.fetch_sub(1, Ordering::Relaxed);
    info!(
        "Client disconnected: {peer} (total: {})",
        state.client_count.load(Ordering::Relaxed)
    );
}

async fn forward(hub: &PeerHub, peer: PeerId, payload: String) -> bool {
    match hub.submit(peer, payload).await {
        Ok(()) => true,
        Err(e) => {
            warn!("Dropping connection {peer}: {e}");
            false
        }
    }
}
