//! Schedule starter sweep.
//!
//! Promotes scheduled-policy schedules whose deferred launch moment has
//! arrived: flips the started marker and activates the first-window
//! assignments that are already due.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::AssignmentStatus;
use crate::store::{AssignmentRepository, ScheduleRepository, Store};

use super::{SweepProcessor, SweepReport};

/// Periodic processor that starts deferred schedules.
#[derive(Debug, Clone)]
pub struct ScheduleStarter {
    store: Store,
}

impl ScheduleStarter {
    /// Create a starter over the given store.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl SweepProcessor for ScheduleStarter {
    fn name(&self) -> &'static str {
        "schedule-starter"
    }

    async fn run_once(&self, now: DateTime<Utc>) -> anyhow::Result<SweepReport> {
        let due = self.store.find_due_for_start(now).await?;
        let mut report = SweepReport::default();

        for schedule in due {
            report.examined += 1;

            // Conditional flip: exactly one sweep instance wins. A loser
            // means an overlapping run already activated this schedule.
            if !self.store.mark_started(schedule.id).await? {
                continue;
            }

            let first_window = match self.store.find_first_window_due(schedule.id, now).await {
                Ok(rows) => rows,
                Err(error) => {
                    tracing::warn!(
                        schedule_id = %schedule.id,
                        error = %error,
                        "Could not load first-window assignments; schedule will be picked up by the advancer"
                    );
                    continue;
                }
            };

            for assignment in first_window {
                match self
                    .store
                    .transition(
                        assignment.id,
                        AssignmentStatus::Pending,
                        AssignmentStatus::Active,
                        now,
                    )
                    .await
                {
                    Ok(true) => report.advanced += 1,
                    Ok(false) => {}
                    Err(error) => {
                        tracing::warn!(
                            assignment_id = %assignment.id,
                            error = %error,
                            "Failed to activate first-window assignment"
                        );
                    }
                }
            }

            tracing::info!(
                schedule_id = %schedule.id,
                name = %schedule.name,
                "Schedule started"
            );
        }

        Ok(report)
    }
}
