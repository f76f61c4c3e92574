//! Continuous-mode scheduling of keeper checks.

use crate::keeper::Keeper;
use crate::manager::{Manager, log_check};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shortest period a scheduler ticks at
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Drives every keeper on its own fixed-interval task until shutdown
pub struct Scheduler {
    interval: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Create a scheduler ticking every `interval`.
    ///
    /// Intervals shorter than [`MIN_INTERVAL`] are raised to it.
    pub fn new(interval: Duration, shutdown: CancellationToken) -> Self {
        if interval < MIN_INTERVAL {
            warn!(requested = ?interval, used = ?MIN_INTERVAL, "Scheduler interval too short, clamping");
        }
        Self {
            interval: interval.max(MIN_INTERVAL),
            shutdown,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// Each keeper moves into its own task; the first check runs right
    /// away. Once every task has observed shutdown the keepers are handed
    /// back in registration order so the caller can stop them.
    pub async fn run(&self, manager: Manager) -> Manager {
        let keepers = manager.into_keepers();
        info!(
            keepers = keepers.len(),
            interval = ?self.interval,
            "Scheduler started"
        );

        let handles: Vec<_> = keepers
            .into_iter()
            .map(|keeper| {
                let name = keeper.name();
                let handle = tokio::spawn(Self::drive(keeper, self.interval, self.shutdown.clone()));
                (name, handle)
            })
            .collect();

        let (names, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let results = futures::future::join_all(handles).await;

        let mut keepers = Vec::with_capacity(results.len());
        for (name, result) in names.into_iter().zip(results) {
            match result {
                Ok(keeper) => keepers.push(keeper),
                // The adapter was dropped with the task; nothing left to release.
                Err(e) => error!(keeper = name, error = %e, "Keeper task aborted"),
            }
        }

        info!("Scheduler stopped");
        Manager::from_keepers(keepers)
    }

    /// Periodic loop for one keeper.
    ///
    /// Ticks that fire while a check is running are skipped, so at most one
    /// check per keeper is ever in flight. A panicking check ends the loop
    /// and the keeper is still handed back for release.
    async fn drive(mut keeper: Keeper, period: Duration, shutdown: CancellationToken) -> Keeper {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Shutdown may race with the tick; never start new I/O after it.
            if shutdown.is_cancelled() {
                break;
            }

            let start = Instant::now();
            let outcome = AssertUnwindSafe(keeper.check()).catch_unwind().await;
            match outcome {
                Ok(result) => log_check(keeper.name(), &result, start.elapsed()),
                Err(_) => {
                    error!(keeper = keeper.name(), "Check panicked, keeper loop stopping");
                    break;
                }
            }
        }

        debug!(
            keeper = keeper.name(),
            checks = keeper.stats().total_checks,
            "Keeper loop stopping"
        );
        keeper
    }
}
