//! Server lifecycle: starts and stops the worker pool, monitor and bridge.

use std::sync::Arc;

use orange_transport::{Transport, TransportError};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bridge::EventBridge;
use crate::config::RpcConfig;
use crate::context::Context;
use crate::dispatcher::Dispatcher;
use crate::events::EventSource;
use crate::monitor::{HangMonitor, MonitorStats};
use crate::registry::{RequestRecord, RequestRegistry};

/// A running dispatch core.
///
/// Shutdown sets the flag in the registry and wakes the monitor and bridge;
/// workers notice it within one receive timeout. Calls already running are
/// waited for, not cancelled.
pub struct OrangeRpc<T: Transport, C: Context> {
    dispatcher: Arc<Dispatcher<T, C>>,
    bridge: EventBridge<T>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    monitor: Option<JoinHandle<MonitorStats>>,
    events: Option<JoinHandle<()>>,
}

impl<T: Transport, C: Context> OrangeRpc<T, C> {
    /// Start the worker pool and the monitor. No event bridge.
    pub fn start(config: RpcConfig, transport: Arc<T>, context: Arc<C>) -> Self {
        let worker_count = config.worker_count();
        let monitor_interval = config.monitor_interval;
        let registry = Arc::new(RequestRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            transport.clone(),
            context,
            registry.clone(),
            config,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        let workers = (0..worker_count)
            .map(|index| tokio::spawn(dispatcher.clone().run_worker(index)))
            .collect();

        let monitor = HangMonitor::new(registry, dispatcher.gauge().clone(), monitor_interval);
        let monitor = tokio::spawn(monitor.run(shutdown_tx.subscribe()));

        info!(workers = worker_count, "Orange RPC dispatcher started");

        Self {
            dispatcher,
            bridge: EventBridge::new(transport),
            shutdown_tx,
            workers,
            monitor: Some(monitor),
            events: None,
        }
    }

    /// Start as [`OrangeRpc::start`] plus a bridge broadcasting events from `source`.
    pub fn start_with_events<S: EventSource>(
        config: RpcConfig,
        transport: Arc<T>,
        context: Arc<C>,
        source: S,
    ) -> Self {
        let mut rpc = Self::start(config, transport, context);
        let bridge = rpc.bridge.clone();
        rpc.events = Some(tokio::spawn(bridge.run(source, rpc.shutdown_tx.subscribe())));
        rpc
    }

    pub async fn broadcast_event(&self, name: &str, payload: &Value) -> Result<(), TransportError> {
        self.bridge.broadcast_event(name, payload).await
    }

    pub fn registry(&self) -> &Arc<RequestRegistry> {
        self.dispatcher.registry()
    }

    /// Calls currently executing, in name order.
    pub fn in_flight(&self) -> Vec<RequestRecord> {
        self.registry().snapshot()
    }

    pub fn busy_workers(&self) -> usize {
        self.dispatcher.gauge().busy()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop every task and wait for them to finish. Returns what the hang
    /// monitor saw while running.
    pub async fn shutdown(mut self) -> MonitorStats {
        info!("Shutting down Orange RPC dispatcher...");
        self.signal_shutdown();

        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                warn!("request worker ended abnormally: {e}");
            }
        }
        if let Some(handle) = self.events.take() {
            if let Err(e) = handle.await {
                warn!("event bridge ended abnormally: {e}");
            }
        }
        let mut stats = MonitorStats::default();
        if let Some(handle) = self.monitor.take() {
            match handle.await {
                Ok(monitor) => stats = monitor,
                Err(e) => warn!("request monitor ended abnormally: {e}"),
            }
        }
        info!("Orange RPC dispatcher stopped");
        stats
    }

    fn signal_shutdown(&self) {
        self.dispatcher.registry().mark_shutdown();
        self.shutdown_tx.send_replace(true);
    }
}

impl<T: Transport, C: Context> Drop for OrangeRpc<T, C> {
    fn drop(&mut self) {
        // Dropped without shutdown(): let the detached tasks wind down.
        self.signal_shutdown();
    }
}
