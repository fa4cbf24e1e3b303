//! Request dispatcher: one receive, decode, route, respond cycle per message.
//!
//! A pool of workers each run [`Dispatcher::run_worker`]. Embedders that
//! drive dispatch from their own loop can call [`Dispatcher::process_next`]
//! instead.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use orange_protocol::{
    Methods, ResponseBuilder, WireError, parse_authenticate_params, parse_call_params,
    parse_envelope, parse_list_params, parse_login_params,
};
use orange_transport::{Message, PeerId, Transport, TransportError};
use serde_json::{Value, json};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, trace, warn};

use crate::config::RpcConfig;
use crate::context::Context;
use crate::registry::RequestRegistry;

/// What one [`Dispatcher::process_next`] iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Nothing arrived before the receive timeout.
    Idle,
    /// A message arrived but was not a valid envelope; no response was sent.
    Discarded,
    /// A message was answered.
    Handled,
}

/// Counts workers that are currently handling a message.
///
/// The pool never has more workers than permits, so this is a saturation
/// signal rather than an admission gate.
pub struct BusyGauge {
    permits: Semaphore,
    capacity: usize,
}

impl BusyGauge {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Semaphore::new(capacity),
            capacity,
        }
    }

    pub async fn begin(&self) -> Option<SemaphorePermit<'_>> {
        self.permits.acquire().await.ok()
    }

    pub fn busy(&self) -> usize {
        self.capacity.saturating_sub(self.permits.available_permits())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_saturated(&self) -> bool {
        self.busy() >= self.capacity
    }
}

/// Challenge token for `peer`: its id as eight hex digits.
///
/// This is a deterministic placeholder, not a nonce. Anyone who knows a peer
/// id knows its token, so it must not be relied on as a secret.
pub fn challenge_token(peer: PeerId) -> String {
    format!("{:08x}", peer.as_u32())
}

pub struct Dispatcher<T, C> {
    transport: Arc<T>,
    context: Arc<C>,
    registry: Arc<RequestRegistry>,
    gauge: Arc<BusyGauge>,
    config: RpcConfig,
}

impl<T: Transport, C: Context> Dispatcher<T, C> {
    pub fn new(
        transport: Arc<T>,
        context: Arc<C>,
        registry: Arc<RequestRegistry>,
        config: RpcConfig,
    ) -> Self {
        let gauge = Arc::new(BusyGauge::new(config.worker_count()));
        Self {
            transport,
            context,
            registry,
            gauge,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        &self.registry
    }

    pub fn gauge(&self) -> &Arc<BusyGauge> {
        &self.gauge
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    /// Worker loop: process messages until the registry is marked shut down.
    /// Shutdown is noticed within one receive timeout.
    pub async fn run_worker(self: Arc<Self>, index: usize) {
        debug!(worker = index, "request dispatcher started");
        while !self.registry.is_shutdown() {
            if let Err(e) = self.process_next().await {
                warn!(worker = index, "receive failed: {e}");
                tokio::time::sleep(self.config.recv_timeout).await;
            }
        }
        debug!(worker = index, "request dispatcher exiting");
    }

    /// Receive at most one message and answer it.
    pub async fn process_next(&self) -> Result<Processed, TransportError> {
        let Some(message) = self.transport.receive(self.config.recv_timeout).await? else {
            return Ok(Processed::Idle);
        };

        let _busy = self.gauge.begin().await;
        if self.dispatch(message).await {
            Ok(Processed::Handled)
        } else {
            Ok(Processed::Discarded)
        }
    }

    /// Answer one message. Returns `false` when the message was discarded.
    pub async fn dispatch(&self, message: Message) -> bool {
        let peer = message.peer;
        let Some(response) = self.handle(message).await else {
            return false;
        };

        if let Err(e) = self.transport.send(Message::new(peer, response)).await {
            debug!(%peer, "response not delivered: {e}");
        }
        true
    }

    /// Build the response for one message without sending it. `None` means
    /// the envelope was malformed and is dropped silently.
    pub async fn handle(&self, message: Message) -> Option<String> {
        let peer = message.peer;
        debug!(%peer, payload = %message.payload, "got message");

        let envelope = match parse_envelope(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(%peer, "could not parse incoming message: {e}");
                return None;
            }
        };

        let mut response = ResponseBuilder::open(envelope.id);

        // Any branch may panic inside the context; the worker and the reply survive.
        let route = self.route(peer, &envelope.method, &envelope.params, &mut response);
        let routed = AssertUnwindSafe(route).catch_unwind().await;
        if routed.is_err() {
            error!(%peer, method = %envelope.method, "request panicked inside the context");
        }

        let wire = response.close();
        trace!(%peer, "sending back: {wire}");
        Some(wire)
    }

    async fn route(
        &self,
        peer: PeerId,
        method: &str,
        params: &Value,
        response: &mut ResponseBuilder,
    ) {
        match method {
            Methods::CALL => self.handle_call(params, response).await,
            Methods::LIST => self.handle_list(params, response).await,
            Methods::CHALLENGE => {
                response
                    .outcome()
                    .result(json!({ "token": challenge_token(peer) }));
            }
            Methods::LOGIN => self.handle_login(peer, params, response).await,
            Methods::LOGOUT => self.handle_logout(params, response).await,
            other => {
                debug!(%peer, method = other, "unknown method");
                response.outcome().error(WireError::invalid_method());
            }
        }
    }

    async fn handle_call(&self, params: &Value, response: &mut ResponseBuilder) {
        let call = match parse_call_params(params) {
            Ok(call) => call,
            Err(e) => {
                debug!("could not parse call message: {e}");
                response.outcome().error(WireError::invalid_call_format());
                return;
            }
        };

        let in_flight = self
            .registry
            .insert(call.composite_name(), self.config.call_timeout);

        let invoked = AssertUnwindSafe(self.context.invoke_call(call, response.outcome()))
            .catch_unwind()
            .await;

        if invoked.is_err() {
            error!(request = in_flight.name(), "call panicked inside the context");
        }
    }

    async fn handle_list(&self, params: &Value, response: &mut ResponseBuilder) {
        // A malformed list request gets an envelope with no outcome key.
        match parse_list_params(params) {
            Ok(list) => {
                self.context
                    .list(list.sid, list.path, response.result_slot())
                    .await;
            }
            Err(e) => debug!("could not parse list params: {e}"),
        }
    }

    async fn handle_login(&self, peer: PeerId, params: &Value, response: &mut ResponseBuilder) {
        let login = match parse_login_params(params) {
            Ok(login) => login,
            Err(e) => {
                debug!("could not parse login parameters: {e}");
                response.outcome().error(WireError::invalid_login());
                return;
            }
        };

        let token = challenge_token(peer);
        match self.context.login(login.username, &token, login.proof).await {
            Ok(session) => response.outcome().result(json!({ "success": session })),
            Err(e) => {
                debug!(user = login.username, "login rejected: {e}");
                response.outcome().error(WireError::access_denied());
            }
        }
    }

    async fn handle_logout(&self, params: &Value, response: &mut ResponseBuilder) {
        let logged_out = match parse_authenticate_params(params) {
            Ok(sid) => self.context.logout(sid).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match logged_out {
            Ok(()) => response.outcome().result(json!({ "success": "VALID" })),
            Err(reason) => {
                debug!("logout failed: {reason}");
                response.outcome().error(WireError::logout_failed());
            }
        }
    }
}
