//! Dispatcher configuration.

use std::time::Duration;

/// How long a call may run before the monitor reports it.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);
/// How often the monitor scans the registry.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Upper bound on each transport receive; also bounds shutdown latency.
    pub recv_timeout: Duration,
    /// Worker task count. Zero is treated as one.
    pub workers: usize,
    pub call_timeout: Duration,
    pub monitor_interval: Duration,
}

impl RpcConfig {
    pub fn new(recv_timeout: Duration, workers: usize) -> Self {
        Self {
            recv_timeout,
            workers: workers.max(1),
            ..Self::default()
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            recv_timeout: DEFAULT_RECV_TIMEOUT,
            workers: DEFAULT_WORKERS,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
        }
    }
}
