//! Keeper lifecycle wrapper around one backend adapter.

use crate::adapters::{self, BackendAdapter};
use crate::error::KeeperError;
use crate::types::{
    BackendDescriptor, BackendKind, CheckStatus, CleanupOutcome, DEFAULT_HOSTNAME,
    DEFAULT_OPERATION_TIMEOUT, DEFAULT_RETENTION_LIMIT, KeeperStats, SustainReport,
};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Settings a keeper passes to its adapter on every check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeeperSettings {
    pub retention_limit: u32,
    pub hostname: String,
    pub operation_timeout: Duration,
}

impl Default for KeeperSettings {
    fn default() -> Self {
        Self {
            retention_limit: DEFAULT_RETENTION_LIMIT,
            hostname: DEFAULT_HOSTNAME.to_string(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

impl From<&BackendDescriptor> for KeeperSettings {
    fn from(descriptor: &BackendDescriptor) -> Self {
        Self {
            retention_limit: descriptor.retention_limit,
            hostname: descriptor.hostname.clone(),
            operation_timeout: descriptor.operation_timeout,
        }
    }
}

/// Owns exactly one backend adapter for the lifetime of the process.
///
/// A keeper without an adapter is disabled: every operation returns
/// immediately without touching the network.
pub struct Keeper {
    kind: BackendKind,
    adapter: Option<Box<dyn BackendAdapter>>,
    settings: KeeperSettings,
    stats: KeeperStats,
}

impl Keeper {
    /// Wrap an already connected adapter
    pub fn new(adapter: Box<dyn BackendAdapter>, settings: KeeperSettings) -> Self {
        Self {
            kind: adapter.kind(),
            adapter: Some(adapter),
            settings,
            stats: KeeperStats::default(),
        }
    }

    /// Create a keeper that never performs I/O
    pub fn disabled(kind: BackendKind) -> Self {
        Self {
            kind,
            adapter: None,
            settings: KeeperSettings::default(),
            stats: KeeperStats::default(),
        }
    }

    /// Connect the adapter described by `descriptor`.
    ///
    /// Ignores the `enabled` flag; see [`Keeper::from_descriptor`].
    pub async fn connect(descriptor: &BackendDescriptor) -> Result<Self, KeeperError> {
        let adapter = adapters::connect(descriptor).await?;
        Ok(Self::new(adapter, KeeperSettings::from(descriptor)))
    }

    /// Build a keeper for a configured backend.
    ///
    /// Absent and disabled descriptors both yield `Ok(None)` without any
    /// network activity.
    pub async fn from_descriptor(
        descriptor: Option<&BackendDescriptor>,
    ) -> Result<Option<Self>, KeeperError> {
        match descriptor {
            Some(descriptor) if descriptor.enabled => Self::connect(descriptor).await.map(Some),
            _ => Ok(None),
        }
    }

    /// Fixed name identifying the backend kind, for log attribution only
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Whether this keeper still holds an adapter
    pub fn is_enabled(&self) -> bool {
        self.adapter.is_some()
    }

    pub fn settings(&self) -> &KeeperSettings {
        &self.settings
    }

    pub fn stats(&self) -> &KeeperStats {
        &self.stats
    }

    /// Perform one keep-alive check.
    ///
    /// Every call is an independent check. Returns `Ok(None)` for a
    /// disabled keeper. The write and the retention pass each get the full
    /// operation timeout; a failed or stalled cleanup is logged and the
    /// check still succeeds.
    pub async fn check(&mut self) -> Result<Option<SustainReport>, KeeperError> {
        let Some(adapter) = self.adapter.as_mut() else {
            return Ok(None);
        };

        let limit = self.settings.operation_timeout;
        let start = Instant::now();

        let written = match timeout(limit, adapter.sustain(&self.settings.hostname)).await {
            Ok(result) => result,
            Err(_) => Err(KeeperError::timeout(self.kind, "sustain", limit)),
        };

        let result = match written {
            Ok(record) => {
                let pruning = adapter.cleanup(self.settings.retention_limit);
                let cleanup = match timeout(limit, pruning).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(e)) => CleanupOutcome::Failed(e),
                    Err(_) => {
                        CleanupOutcome::Failed(KeeperError::timeout(self.kind, "cleanup", limit))
                    }
                };
                Ok(SustainReport { record, cleanup })
            }
            Err(e) => Err(e),
        };

        let duration = start.elapsed();
        let status = match &result {
            Ok(_) => CheckStatus::Succeeded,
            Err(e) if e.is_timeout() => CheckStatus::TimedOut,
            Err(_) => CheckStatus::Failed,
        };
        self.stats.update(status, duration);

        if let Ok(report) = &result {
            match &report.cleanup {
                CleanupOutcome::Pruned(removed) => {
                    debug!(
                        keeper = self.name(),
                        removed,
                        limit = self.settings.retention_limit,
                        "Retention applied"
                    );
                }
                CleanupOutcome::NotApplicable => {}
                CleanupOutcome::Failed(e) => {
                    warn!(keeper = self.name(), error = %e, "Failed to cleanup old records");
                }
            }
        }

        result.map(Some)
    }

    /// Release the adapter's session.
    ///
    /// The adapter is dropped afterwards whatever the outcome, so a second
    /// call is a no-op.
    pub async fn stop(&mut self) -> Result<(), KeeperError> {
        let Some(mut adapter) = self.adapter.take() else {
            return Ok(());
        };

        let limit = self.settings.operation_timeout;
        let result = match timeout(limit, adapter.release()).await {
            Ok(result) => result,
            Err(_) => Err(KeeperError::timeout(self.kind, "release", limit)),
        };

        if result.is_ok() {
            info!(keeper = self.name(), "Keeper stopped");
        }
        result
    }
}

impl std::fmt::Debug for Keeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keeper")
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("settings", &self.settings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryBackend, MockBackendAdapter};
    use crate::types::{ConnectionParams, KeepAliveRecord};

    fn fast_settings() -> KeeperSettings {
        KeeperSettings {
            retention_limit: 2,
            hostname: "test-host".to_string(),
            operation_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_disabled_keeper_is_noop() {
        let mut keeper = Keeper::disabled(BackendKind::RelationalStore);

        assert!(!keeper.is_enabled());
        assert_eq!(keeper.name(), "Supabase");
        assert!(keeper.check().await.unwrap().is_none());
        assert!(keeper.stop().await.is_ok());
        assert_eq!(keeper.stats().total_checks, 0);
    }

    #[tokio::test]
    async fn test_disabled_descriptor_builds_nothing() {
        // Unroutable address: any connect attempt would fail the test
        let mut descriptor = BackendDescriptor::new(ConnectionParams::RelationalStore {
            uri: "postgres://keeper@192.0.2.1:5432/keeper".to_string(),
            password: None,
        });
        descriptor.enabled = false;

        assert!(Keeper::from_descriptor(Some(&descriptor)).await.unwrap().is_none());
        assert!(Keeper::from_descriptor(None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_check_passes_settings_to_adapter() {
        let mut adapter = MockBackendAdapter::new();
        adapter.expect_kind().return_const(BackendKind::DocumentStore);
        adapter
            .expect_sustain()
            .withf(|hostname| hostname.to_string() == "test-host")
            .times(2)
            .returning(|hostname| Ok(KeepAliveRecord::new(BackendKind::DocumentStore, hostname)));
        adapter
            .expect_cleanup()
            .withf(|limit| *limit == 2)
            .times(2)
            .returning(|_| Ok(CleanupOutcome::Pruned(0)));

        let mut keeper = Keeper::new(Box::new(adapter), fast_settings());
        assert!(keeper.check().await.unwrap().is_some());
        assert!(keeper.check().await.unwrap().is_some());
        assert_eq!(keeper.stats().successful_checks, 2);
        assert_eq!(keeper.stats().consecutive_successes, 2);
    }

    #[tokio::test]
    async fn test_stop_releases_once() {
        let mut adapter = MockBackendAdapter::new();
        adapter.expect_kind().return_const(BackendKind::Queue);
        adapter.expect_release().times(1).returning(|| Ok(()));

        let mut keeper = Keeper::new(Box::new(adapter), fast_settings());
        assert!(keeper.stop().await.is_ok());
        assert!(keeper.stop().await.is_ok());
        assert!(!keeper.is_enabled());
        assert!(keeper.check().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_stop_still_drops_adapter() {
        let mut adapter = MockBackendAdapter::new();
        adapter.expect_kind().return_const(BackendKind::Queue);
        adapter
            .expect_release()
            .times(1)
            .returning(|| Err(KeeperError::release(BackendKind::Queue, "broker gone")));

        let mut keeper = Keeper::new(Box::new(adapter), fast_settings());
        assert!(matches!(keeper.stop().await, Err(KeeperError::Release { .. })));
        assert!(keeper.stop().await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_not_a_check_failure() {
        let backend = MemoryBackend::new();
        backend.fail_cleanup(true);
        let mut keeper = Keeper::new(
            Box::new(backend.adapter(BackendKind::DocumentStore)),
            fast_settings(),
        );

        let report = keeper.check().await.unwrap().unwrap();
        assert!(matches!(report.cleanup, CleanupOutcome::Failed(_)));
        assert_eq!(keeper.stats().failed_checks, 0);
    }

    #[tokio::test]
    async fn test_failed_write_skips_cleanup() {
        let mut adapter = MockBackendAdapter::new();
        adapter.expect_kind().return_const(BackendKind::RelationalStore);
        adapter
            .expect_sustain()
            .times(1)
            .returning(|_| Err(KeeperError::sustain(BackendKind::RelationalStore, "disk full")));
        adapter.expect_cleanup().never();

        let mut keeper = Keeper::new(Box::new(adapter), fast_settings());
        assert!(matches!(keeper.check().await, Err(KeeperError::Sustain { .. })));
        assert_eq!(keeper.stats().failed_checks, 1);
    }

    #[tokio::test]
    async fn test_stalled_cleanup_still_counts_write() {
        let backend = MemoryBackend::new();
        backend.set_cleanup_delay(Some(Duration::from_secs(5)));
        let mut keeper = Keeper::new(
            Box::new(backend.adapter(BackendKind::DocumentStore)),
            fast_settings(),
        );

        let report = keeper.check().await.unwrap().unwrap();
        match report.cleanup {
            CleanupOutcome::Failed(KeeperError::Timeout { operation, .. }) => {
                assert_eq!(operation, "cleanup");
            }
            other => panic!("expected cleanup timeout, got {other:?}"),
        }
        assert_eq!(backend.record_count(), 1);
        assert_eq!(keeper.stats().successful_checks, 1);
        assert_eq!(keeper.stats().failed_checks, 0);
        assert_eq!(keeper.stats().timeouts, 0);
    }

    #[tokio::test]
    async fn test_slow_sustain_times_out() {
        let backend = MemoryBackend::new();
        backend.set_sustain_delay(Some(Duration::from_secs(5)));
        let mut keeper = Keeper::new(
            Box::new(backend.adapter(BackendKind::DocumentStore)),
            fast_settings(),
        );

        let err = keeper.check().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(keeper.stats().timeouts, 1);
        assert_eq!(keeper.stats().consecutive_failures, 1);
        assert_eq!(backend.record_count(), 0);
    }

    #[tokio::test]
    async fn test_retention_through_keeper() {
        let backend = MemoryBackend::new();
        let mut keeper = Keeper::new(
            Box::new(backend.adapter(BackendKind::DocumentStore)),
            fast_settings(),
        );

        for _ in 0..4 {
            keeper.check().await.unwrap();
        }
        assert_eq!(backend.record_count(), 2);
    }
}
