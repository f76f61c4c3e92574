//! In-process backend used by tests and benchmarks.
//!
//! [`MemoryBackend`] is a shared handle to an append log that follows the
//! same retention policy as the hosted backends. Any number of
//! [`MemoryAdapter`]s can point at one backend, and the handle can be
//! inspected or told to fail after the adapter has moved into a keeper.

use super::BackendAdapter;
use crate::error::KeeperError;
use crate::retention::prune_to_limit;
use crate::types::{BackendKind, CleanupOutcome, KeepAliveRecord};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct MemoryLog {
    records: Vec<KeepAliveRecord>,
    next_id: u64,
    schema_created: bool,
    sustain_calls: u64,
    release_calls: u64,
    fail_sustain: bool,
    fail_cleanup: bool,
    fail_release: bool,
    sustain_delay: Option<Duration>,
    cleanup_delay: Option<Duration>,
}

/// Shared in-process keep-alive log
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryLog>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryLog> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Build an adapter reporting `kind` that writes into this log
    pub fn adapter(&self, kind: BackendKind) -> MemoryAdapter {
        MemoryAdapter {
            kind,
            backend: Some(self.clone()),
        }
    }

    /// Snapshot of the stored records in insertion order
    pub fn records(&self) -> Vec<KeepAliveRecord> {
        self.lock().records.clone()
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    /// Number of sustain calls that reached the backend
    pub fn sustain_calls(&self) -> u64 {
        self.lock().sustain_calls
    }

    /// Number of release calls that reached the backend
    pub fn release_calls(&self) -> u64 {
        self.lock().release_calls
    }

    pub fn schema_created(&self) -> bool {
        self.lock().schema_created
    }

    /// Make subsequent writes fail
    pub fn fail_sustain(&self, fail: bool) {
        self.lock().fail_sustain = fail;
    }

    /// Make subsequent retention passes fail after the write
    pub fn fail_cleanup(&self, fail: bool) {
        self.lock().fail_cleanup = fail;
    }

    /// Make subsequent releases fail
    pub fn fail_release(&self, fail: bool) {
        self.lock().fail_release = fail;
    }

    /// Delay every write, simulating a slow backend
    pub fn set_sustain_delay(&self, delay: Option<Duration>) {
        self.lock().sustain_delay = delay;
    }

    /// Delay every retention pass, simulating a stalled delete
    pub fn set_cleanup_delay(&self, delay: Option<Duration>) {
        self.lock().cleanup_delay = delay;
    }
}

/// Adapter over a [`MemoryBackend`]
#[derive(Debug)]
pub struct MemoryAdapter {
    kind: BackendKind,
    backend: Option<MemoryBackend>,
}

#[async_trait]
impl BackendAdapter for MemoryAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn sustain(&mut self, hostname: &str) -> Result<KeepAliveRecord, KeeperError> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| KeeperError::sustain(self.kind, "backend already released"))?;

        let delay = {
            let mut log = backend.lock();
            log.sustain_calls += 1;
            log.sustain_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut log = backend.lock();
        if log.fail_sustain {
            return Err(KeeperError::sustain(self.kind, "injected write failure"));
        }

        // Schema bootstrap is idempotent, as on the hosted backends.
        log.schema_created = true;

        log.next_id += 1;
        let record = KeepAliveRecord::new(self.kind, hostname).with_id(log.next_id.to_string());
        log.records.push(record.clone());

        Ok(record)
    }

    async fn cleanup(&mut self, retention_limit: u32) -> Result<CleanupOutcome, KeeperError> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| KeeperError::cleanup(self.kind, "backend already released"))?;

        let delay = backend.lock().cleanup_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut log = backend.lock();
        if log.fail_cleanup {
            return Err(KeeperError::cleanup(self.kind, "injected cleanup failure"));
        }

        Ok(CleanupOutcome::Pruned(prune_to_limit(&mut log.records, retention_limit)))
    }

    async fn release(&mut self) -> Result<(), KeeperError> {
        let Some(backend) = self.backend.take() else {
            return Ok(());
        };

        let mut log = backend.lock();
        log.release_calls += 1;
        if log.fail_release {
            return Err(KeeperError::release(self.kind, "injected release failure"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sustain_twice_on_fresh_backend() {
        let backend = MemoryBackend::new();
        let mut adapter = backend.adapter(BackendKind::RelationalStore);

        assert!(adapter.sustain("host").await.is_ok());
        assert!(adapter.sustain("host").await.is_ok());
        assert!(backend.schema_created());
        assert_eq!(backend.record_count(), 2);
    }

    #[tokio::test]
    async fn test_record_fields() {
        let backend = MemoryBackend::new();
        let mut adapter = backend.adapter(BackendKind::DocumentStore);

        let record = adapter.sustain("laptop").await.unwrap();
        assert_eq!(record.ping_source, "mongodb-keeper");
        assert_eq!(record.ping_details.hostname, "laptop");
        assert_eq!(record.ping_details.version, "1.0");
        assert_eq!(record.id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_retention_bounds_log() {
        let backend = MemoryBackend::new();
        let mut adapter = backend.adapter(BackendKind::DocumentStore);

        for _ in 0..5 {
            adapter.sustain("host").await.unwrap();
            adapter.cleanup(3).await.unwrap();
        }

        let ids: Vec<_> = backend.records().into_iter().filter_map(|r| r.id).collect();
        assert_eq!(ids, vec!["3", "4", "5"]);
    }

    #[tokio::test]
    async fn test_cleanup_failure_keeps_write() {
        let backend = MemoryBackend::new();
        backend.fail_cleanup(true);
        let mut adapter = backend.adapter(BackendKind::DocumentStore);

        adapter.sustain("host").await.unwrap();
        let err = adapter.cleanup(1).await.unwrap_err();
        assert!(matches!(err, KeeperError::Cleanup { .. }));
        adapter.sustain("host").await.unwrap();
        assert_eq!(backend.record_count(), 2);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let backend = MemoryBackend::new();
        let mut adapter = backend.adapter(BackendKind::Queue);

        adapter.release().await.unwrap();
        adapter.release().await.unwrap();
        assert_eq!(backend.release_calls(), 1);
        assert!(adapter.sustain("host").await.is_err());
        assert!(adapter.cleanup(1).await.is_err());
    }
}
