//! Registry of in-flight calls.
//!
//! Records are ordered by composite `object.method` name. Identical calls
//! running at the same time each get their own record; a per-record sequence
//! number keeps duplicates apart. The same lock also guards the shutdown
//! flag. It is held only for insert, remove, scan and flag access, never
//! while a call runs.

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// One call currently executing in some worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub name: String,
    pub started_at: Instant,
    pub expires_at: Instant,
}

/// A record found past its expiry by [`RequestRegistry::scan_expired`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HungRequest {
    pub name: String,
    pub running_for: Duration,
    pub overdue_by: Duration,
}

type RecordKey = (String, u64);

#[derive(Default)]
struct RegistryState {
    records: BTreeMap<RecordKey, RequestRecord>,
    next_seq: u64,
    shutdown: bool,
}

#[derive(Default)]
pub struct RequestRegistry {
    state: Mutex<RegistryState>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a call named `name` that is expected to finish within `timeout`.
    /// The record lives exactly as long as the returned guard.
    pub fn insert(&self, name: impl Into<String>, timeout: Duration) -> InFlight<'_> {
        let name = name.into();
        let started_at = Instant::now();
        let record = RequestRecord {
            name: name.clone(),
            started_at,
            expires_at: started_at + timeout,
        };

        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let key = (name, seq);
        state.records.insert(key.clone(), record);

        InFlight {
            registry: self,
            key,
        }
    }

    fn remove(&self, key: &RecordKey) -> Option<RequestRecord> {
        self.state.lock().records.remove(key)
    }

    /// Records whose expiry is at or before `now`. Nothing is removed.
    pub fn scan_expired(&self, now: Instant) -> Vec<HungRequest> {
        let state = self.state.lock();
        state
            .records
            .values()
            .filter(|record| record.expires_at <= now)
            .map(|record| HungRequest {
                name: record.name.clone(),
                running_for: now.saturating_duration_since(record.started_at),
                overdue_by: now.saturating_duration_since(record.expires_at),
            })
            .collect()
    }

    /// All records in name order.
    pub fn snapshot(&self) -> Vec<RequestRecord> {
        self.state.lock().records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count(&self, name: &str) -> usize {
        self.state
            .lock()
            .records
            .keys()
            .filter(|(key, _)| key == name)
            .count()
    }

    pub fn mark_shutdown(&self) {
        self.state.lock().shutdown = true;
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}

/// Guard for one registered call. Dropping it removes the record, so the
/// record goes away on every exit path, including a panic unwinding through
/// the call.
#[must_use = "the record is removed as soon as the guard is dropped"]
pub struct InFlight<'a> {
    registry: &'a RequestRegistry,
    key: RecordKey,
}

impl InFlight<'_> {
    pub fn name(&self) -> &str {
        &self.key.0
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.registry.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_drop_removes_record() {
        let registry = RequestRegistry::new();
        {
            let guard = registry.insert("net.status", Duration::from_secs(10));
            assert_eq!(guard.name(), "net.status");
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn duplicate_names_coexist() {
        let registry = RequestRegistry::new();
        let first = registry.insert("net.status", Duration::from_secs(10));
        let second = registry.insert("net.status", Duration::from_secs(10));
        assert_eq!(registry.count("net.status"), 2);

        drop(first);
        assert_eq!(registry.count("net.status"), 1);
        drop(second);
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_name_ordered() {
        let registry = RequestRegistry::new();
        let _b = registry.insert("wifi.scan", Duration::from_secs(1));
        let _a = registry.insert("net.status", Duration::from_secs(1));
        let names: Vec<_> = registry.snapshot().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["net.status", "wifi.scan"]);
    }

    #[test]
    fn scan_reports_only_expired() {
        let registry = RequestRegistry::new();
        let _slow = registry.insert("sys.upgrade", Duration::ZERO);
        let _fast = registry.insert("net.status", Duration::from_secs(3600));

        let hung = registry.scan_expired(Instant::now());
        assert_eq!(hung.len(), 1);
        assert_eq!(hung[0].name, "sys.upgrade");
        // scanning never removes
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn shutdown_flag() {
        let registry = RequestRegistry::new();
        assert!(!registry.is_shutdown());
        registry.mark_shutdown();
        assert!(registry.is_shutdown());
    }
}
