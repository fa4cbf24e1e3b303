//! Hang monitor.
//!
//! A script stuck in an endless loop holds its worker forever, and repeated
//! calls to it can eat the whole pool. Nothing here cancels such a call; the
//! monitor only makes the condition visible in the logs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::dispatcher::BusyGauge;
use crate::registry::{HungRequest, RequestRegistry};

/// Outcome of one [`HangMonitor::scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub hung: Vec<HungRequest>,
    /// Every worker was busy at scan time.
    pub saturated: bool,
}

/// Totals over the lifetime of [`HangMonitor::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub scans: u64,
    pub hung_reports: u64,
    pub saturated_scans: u64,
}

pub struct HangMonitor {
    registry: Arc<RequestRegistry>,
    gauge: Arc<BusyGauge>,
    interval: Duration,
}

impl HangMonitor {
    pub fn new(registry: Arc<RequestRegistry>, gauge: Arc<BusyGauge>, interval: Duration) -> Self {
        Self {
            registry,
            gauge,
            interval,
        }
    }

    /// Report every record past its expiry. Records are left in place; only
    /// the owning worker removes them.
    pub fn scan(&self) -> MonitorReport {
        let hung = self.registry.scan_expired(Instant::now());
        for request in &hung {
            error!(
                request = %request.name,
                running_for = ?request.running_for,
                "request {} may have hanged. You can ignore this message if this is expected.",
                request.name
            );
        }

        let saturated = self.gauge.is_saturated();
        if saturated {
            warn!(
                workers = self.gauge.capacity(),
                hung = hung.len(),
                "all request workers are busy"
            );
        }
        MonitorReport { hung, saturated }
    }

    /// Scan every interval until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> MonitorStats {
        debug!(interval = ?self.interval, "request monitor started");
        let mut stats = MonitorStats::default();
        while !self.registry.is_shutdown() {
            let report = self.scan();
            stats.scans += 1;
            stats.hung_reports += report.hung.len() as u64;
            if report.saturated {
                stats.saturated_scans += 1;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(scans = stats.scans, hung = stats.hung_reports, "request monitor exiting");
        stats
    }
}
