//! Periodic sweep processors.
//!
//! Three independent processors drive every assignment from `pending` to
//! `completed` without human action: the schedule starter, the lifecycle
//! advancer, and the campaign launcher. Each is a plain unit with a single
//! `run_once(now)` entry point so tests can drive it synchronously and
//! deterministically; the periodic trigger is a thin wrapper around that
//! entry point.
//!
//! Processors never run concurrently with themselves: the runner awaits one
//! sweep before ticking again, and a sweep that overruns its interval simply
//! delays the next tick. Different processors may overlap freely: they
//! select on disjoint status predicates and every write is a guarded
//! conditional update.

pub mod advancer;
pub mod launcher;
pub mod starter;

pub use advancer::LifecycleAdvancer;
pub use launcher::CampaignLauncher;
pub use starter::ScheduleStarter;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;

use crate::logging::SweepTimer;

/// Row counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Rows matching the selection predicate.
    pub examined: usize,
    /// Rows actually advanced.
    pub advanced: usize,
}

/// One periodic processor with a deterministic single-run entry point.
#[async_trait]
pub trait SweepProcessor: Send + Sync {
    /// Stable name used in logs.
    fn name(&self) -> &'static str;

    /// Process one bounded batch as of `now`.
    ///
    /// A per-row failure is logged inside the batch and does not fail the
    /// sweep; a returned error means the sweep as a whole could not run and
    /// the next tick retries.
    async fn run_once(&self, now: DateTime<Utc>) -> anyhow::Result<SweepReport>;
}

/// Drive a processor on a fixed interval until the task is dropped.
///
/// Errors and panics are caught and logged; no sweep failure ever
/// terminates the loop.
pub async fn run_periodic(processor: Arc<dyn SweepProcessor>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    // An overrunning sweep delays the next tick instead of bursting.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let timer = SweepTimer::start(processor.name());
        // Each sweep runs in its own task so a panic surfaces here as a
        // JoinError instead of unwinding through the loop.
        let sweep = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.run_once(Utc::now()).await })
        };
        match sweep.await {
            Ok(Ok(report)) => timer.finish(&report),
            Ok(Err(error)) => timer.fail(&error),
            Err(join_error) => timer.fail(&join_error),
        }
    }
}
