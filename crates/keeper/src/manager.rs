//! Manager for keeper lifecycle.

use crate::error::KeeperError;
use crate::keeper::Keeper;
use crate::types::SustainReport;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of one keeper's check within a pass
#[derive(Debug)]
pub struct CheckOutcome {
    /// Name of the keeper that ran the check
    pub keeper: &'static str,

    /// `Ok(None)` when the keeper is disabled
    pub result: Result<Option<SustainReport>, KeeperError>,

    pub duration: Duration,
}

impl CheckOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-keeper outcomes of one check pass, in registration order
#[derive(Debug, Default)]
pub struct PassReport {
    pub outcomes: Vec<CheckOutcome>,

    /// Keepers not checked because shutdown was requested mid-pass
    pub skipped: usize,
}

impl PassReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Per-keeper outcomes of a shutdown
#[derive(Debug, Default)]
pub struct StopReport {
    /// Number of keepers asked to stop
    pub attempted: usize,

    /// Keepers whose release failed
    pub failures: Vec<(&'static str, KeeperError)>,
}

/// Holds registered keepers in registration order
#[derive(Debug, Default)]
pub struct Manager {
    keepers: Vec<Keeper>,
}

impl Manager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a keeper. Duplicates are allowed and run independently.
    pub fn register(&mut self, keeper: Keeper) {
        info!(keeper = keeper.name(), "Keeper registered");
        self.keepers.push(keeper);
    }

    /// True if no keepers are registered
    pub fn is_empty(&self) -> bool {
        self.keepers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keepers.len()
    }

    /// Keeper names in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.keepers.iter().map(Keeper::name).collect()
    }

    pub fn keepers(&self) -> &[Keeper] {
        &self.keepers
    }

    /// Hand the keepers over, e.g. to a scheduler
    pub fn into_keepers(self) -> Vec<Keeper> {
        self.keepers
    }

    /// Take back keepers handed out by [`Manager::into_keepers`]
    pub(crate) fn from_keepers(keepers: Vec<Keeper>) -> Self {
        Self { keepers }
    }

    /// Run one check on every keeper, in registration order.
    ///
    /// A failing keeper never stops the pass. Once `shutdown` is cancelled
    /// no further check is started; a check already running finishes.
    pub async fn run_once(&mut self, shutdown: &CancellationToken) -> PassReport {
        let mut report = PassReport::default();
        let total = self.keepers.len();

        for (position, keeper) in self.keepers.iter_mut().enumerate() {
            if shutdown.is_cancelled() {
                report.skipped = total - position;
                warn!(skipped = report.skipped, "Shutdown requested, skipping remaining checks");
                break;
            }

            let start = Instant::now();
            let result = keeper.check().await;
            let duration = start.elapsed();

            log_check(keeper.name(), &result, duration);

            report.outcomes.push(CheckOutcome {
                keeper: keeper.name(),
                result,
                duration,
            });
        }

        report
    }

    /// Stop every keeper in registration order.
    ///
    /// Every keeper is asked to stop even if an earlier one failed. Failures
    /// are logged and collected; the manager cannot be used afterwards.
    pub async fn stop(self) -> StopReport {
        let mut report = StopReport::default();

        for mut keeper in self.keepers {
            report.attempted += 1;
            if let Err(e) = keeper.stop().await {
                warn!(keeper = keeper.name(), error = %e, "Error stopping keeper");
                report.failures.push((keeper.name(), e));
            }
        }

        info!(
            attempted = report.attempted,
            failed = report.failures.len(),
            "All keepers stopped"
        );
        report
    }
}

impl FromIterator<Keeper> for Manager {
    fn from_iter<I: IntoIterator<Item = Keeper>>(iter: I) -> Self {
        let mut manager = Manager::new();
        for keeper in iter {
            manager.register(keeper);
        }
        manager
    }
}

/// Log the outcome of one check with the keeper's identity
pub(crate) fn log_check(
    name: &'static str,
    result: &Result<Option<SustainReport>, KeeperError>,
    duration: Duration,
) {
    match result {
        Ok(Some(report)) => info!(
            keeper = name,
            record_id = report.record.id.as_deref().unwrap_or("-"),
            duration_ms = duration.as_millis(),
            "Check successful"
        ),
        Ok(None) => info!(keeper = name, "Check skipped, keeper disabled"),
        Err(e) => warn!(
            keeper = name,
            error = %e,
            duration_ms = duration.as_millis(),
            "Check failed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryBackend;
    use crate::keeper::KeeperSettings;
    use crate::types::BackendKind;
    use crate::test_support::CaptureLayer;
    use tracing::Level;
    use tracing_subscriber::layer::SubscriberExt;

    fn memory_keeper(backend: &MemoryBackend, kind: BackendKind, limit: u32) -> Keeper {
        Keeper::new(
            Box::new(backend.adapter(kind)),
            KeeperSettings {
                retention_limit: limit,
                hostname: "test-host".to_string(),
                operation_timeout: Duration::from_secs(1),
            },
        )
    }

    #[tokio::test]
    async fn test_run_once_does_not_short_circuit() {
        let backends: Vec<_> = (0..5).map(|_| MemoryBackend::new()).collect();
        backends[0].fail_sustain(true);
        backends[3].fail_sustain(true);

        let mut manager: Manager = backends
            .iter()
            .map(|b| memory_keeper(b, BackendKind::DocumentStore, 10))
            .collect();

        let report = manager.run_once(&CancellationToken::new()).await;

        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.succeeded(), 3);
        assert_eq!(report.skipped, 0);
        for backend in &backends {
            assert_eq!(backend.sustain_calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_stop_attempts_every_keeper() {
        let backends: Vec<_> = (0..4).map(|_| MemoryBackend::new()).collect();
        backends[0].fail_release(true);
        backends[1].fail_release(true);

        let manager: Manager = backends
            .iter()
            .map(|b| memory_keeper(b, BackendKind::Queue, 10))
            .collect();

        let report = manager.stop().await;

        assert_eq!(report.attempted, 4);
        assert_eq!(report.failures.len(), 2);
        for backend in &backends {
            assert_eq!(backend.release_calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_duplicate_kinds_run_independently() {
        let first = MemoryBackend::new();
        let second = MemoryBackend::new();

        let mut manager = Manager::new();
        manager.register(memory_keeper(&first, BackendKind::RelationalStore, 10));
        manager.register(memory_keeper(&second, BackendKind::RelationalStore, 10));

        assert_eq!(manager.names(), vec!["Supabase", "Supabase"]);
        manager.run_once(&CancellationToken::new()).await;
        assert_eq!(first.record_count(), 1);
        assert_eq!(second.record_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_manager() {
        let mut manager = Manager::new();
        assert!(manager.is_empty());

        let report = manager.run_once(&CancellationToken::new()).await;
        assert!(report.outcomes.is_empty());

        let stop = manager.stop().await;
        assert_eq!(stop.attempted, 0);
    }

    #[tokio::test]
    async fn test_cancelled_pass_skips_remaining_keepers() {
        let backend = MemoryBackend::new();
        let mut manager: Manager = (0..3)
            .map(|_| memory_keeper(&backend, BackendKind::DocumentStore, 10))
            .collect();

        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let report = manager.run_once(&shutdown).await;
        assert!(report.outcomes.is_empty());
        assert_eq!(report.skipped, 3);
        assert_eq!(backend.sustain_calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_then_success_logged_in_order() {
        let capture = CaptureLayer::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let failing = MemoryBackend::new();
        failing.fail_sustain(true);
        let healthy = MemoryBackend::new();

        let mut manager = Manager::new();
        manager.register(memory_keeper(&failing, BackendKind::Queue, 10));
        manager.register(memory_keeper(&healthy, BackendKind::DocumentStore, 10));

        let report = manager.run_once(&CancellationToken::new()).await;
        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 1);

        let lines = capture.lines();
        let outcomes: Vec<_> = lines
            .iter()
            .filter(|(_, _, message)| message.starts_with("Check "))
            .map(|(level, keeper, message)| (*level, keeper.as_str(), message.as_str()))
            .collect();

        assert_eq!(
            outcomes,
            vec![
                (Level::WARN, "CloudAMQP", "Check failed"),
                (Level::INFO, "MongoDB", "Check successful"),
            ]
        );
    }

    #[tokio::test]
    async fn test_document_store_scenario_keeps_two_most_recent() {
        let documents = MemoryBackend::new();

        let mut manager = Manager::new();
        manager.register(memory_keeper(&documents, BackendKind::DocumentStore, 2));
        // Relational store is disabled, so nothing is built or registered for it

        let shutdown = CancellationToken::new();
        let mut written = Vec::new();
        for _ in 0..3 {
            let report = manager.run_once(&shutdown).await;
            let outcome = report.outcomes.into_iter().next().unwrap();
            let record = outcome.result.unwrap().unwrap().record;
            written.push(record.id.unwrap());
        }

        let kept: Vec<_> = documents.records().into_iter().filter_map(|r| r.id).collect();
        assert_eq!(kept, written[1..].to_vec());
    }
}
