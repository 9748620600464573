//! Background periodic tasks.

use crate::retention::{run_sweep, RetentionPolicy};
use crate::storage::RelayStorage;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// When a periodic job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub interval: Duration,
    /// Run once this long after spawning, before the regular cadence. `None` waits a full interval.
    pub first_run_after: Option<Duration>,
}

/// Spawn `job` on the tokio runtime according to `schedule`.
///
/// A slow run delays the following ticks instead of bursting to catch up.
pub fn spawn_periodic<F>(name: &'static str, schedule: Schedule, mut job: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        if let Some(delay) = schedule.first_run_after {
            time::sleep(delay).await;
            tracing::debug!(task = name, "Running startup pass");
            job();
        }

        let mut interval = time::interval_at(Instant::now() + schedule.interval, schedule.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tracing::debug!(task = name, "Running scheduled pass");
            job();
        }
    })
}

/// Run retention sweeps on `schedule`.
pub fn spawn_retention_task(
    storage: RelayStorage,
    policy: RetentionPolicy,
    schedule: Schedule,
) -> JoinHandle<()> {
    spawn_periodic("retention", schedule, move || {
        let report = run_sweep(&storage, &policy, chrono::Utc::now());
        tracing::debug!(?report, "Retention sweep completed");
    })
}
