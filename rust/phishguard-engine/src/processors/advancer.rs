//! Lifecycle advancer sweep.
//!
//! Two passes per run, both driven purely off assignment timestamps:
//! activate pending assignments whose launch instant has passed, then expire
//! active assignments past their expiry, eagerly activating each user's next
//! queued course so nobody waits an extra cycle. When a schedule runs out of
//! pending/active rows it is marked completed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Assignment, AssignmentStatus};
use crate::store::{AssignmentRepository, ScheduleRepository, Store};

use super::{SweepProcessor, SweepReport};

/// Periodic processor that advances assignment lifecycles.
#[derive(Debug, Clone)]
pub struct LifecycleAdvancer {
    store: Store,
}

impl LifecycleAdvancer {
    /// Create an advancer over the given store.
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// After expiring one row, pull the same user's next queued course
    /// forward, or complete the schedule when nothing is left.
    async fn advance_sequence(
        &self,
        schedule_id: Uuid,
        expired: &Assignment,
        now: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        let Some(expired_at) = expired.expires_at else {
            return Ok(0);
        };

        let next = self
            .store
            .next_pending_after(schedule_id, expired.user_id, expired_at)
            .await?;

        if let Some(next) = next {
            // Activate eagerly when the next window is already open; a
            // future window is left for the activation pass of a later run.
            if next.launch_at.is_some_and(|at| at <= now)
                && self
                    .store
                    .transition(
                        next.id,
                        AssignmentStatus::Pending,
                        AssignmentStatus::Active,
                        now,
                    )
                    .await?
            {
                return Ok(1);
            }
            return Ok(0);
        }

        if self.store.count_open(schedule_id).await? == 0
            && self.store.mark_completed(schedule_id).await?
        {
            tracing::info!(schedule_id = %schedule_id, "Schedule completed");
        }
        Ok(0)
    }
}

#[async_trait]
impl SweepProcessor for LifecycleAdvancer {
    fn name(&self) -> &'static str {
        "lifecycle-advancer"
    }

    async fn run_once(&self, now: DateTime<Utc>) -> anyhow::Result<SweepReport> {
        let mut report = SweepReport::default();

        // Pass 1: open windows.
        for assignment in self.store.find_pending_due(now).await? {
            report.examined += 1;
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
                        "Failed to activate assignment; retrying next sweep"
                    );
                }
            }
        }

        // Pass 2: closed windows.
        for assignment in self.store.find_active_expired(now).await? {
            report.examined += 1;
            match self
                .store
                .transition(
                    assignment.id,
                    AssignmentStatus::Active,
                    AssignmentStatus::Expired,
                    now,
                )
                .await
            {
                Ok(true) => report.advanced += 1,
                Ok(false) => continue,
                Err(error) => {
                    tracing::warn!(
                        assignment_id = %assignment.id,
                        error = %error,
                        "Failed to expire assignment; retrying next sweep"
                    );
                    continue;
                }
            }

            if let Some(schedule_id) = assignment.schedule_id {
                match self.advance_sequence(schedule_id, &assignment, now).await {
                    Ok(advanced) => report.advanced += advanced,
                    Err(error) => {
                        // The row itself is already expired; only the eager
                        // follow-up failed. The activation pass of the next
                        // sweep picks the successor up.
                        tracing::warn!(
                            assignment_id = %assignment.id,
                            schedule_id = %schedule_id,
                            error = %error,
                            "Sequence advancement failed"
                        );
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, TimeZone};

    use crate::domain::{CampaignKind, LaunchPolicy, Schedule, ScheduleStatus};

    fn schedule() -> Schedule {
        let now = Utc::now();
        Schedule {
            id: Uuid::new_v4(),
            name: "sequence test".to_string(),
            group_ids: vec![Uuid::new_v4()],
            user_ids: vec![],
            course_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
            kind: CampaignKind::PhishingAwareness,
            policy: LaunchPolicy::Immediate,
            status: ScheduleStatus::Running,
            started: true,
            starts_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    fn row(
        schedule: &Schedule,
        user_id: Uuid,
        course_id: Uuid,
        status: AssignmentStatus,
        launch_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Assignment {
        let now = Utc::now();
        Assignment {
            id: Uuid::new_v4(),
            user_id,
            course_id,
            schedule_id: Some(schedule.id),
            launch_at: Some(launch_at),
            expires_at: Some(expires_at),
            status,
            visible: status == AssignmentStatus::Active,
            campaign_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    // The eager follow-up is the safety net for a successor the activation
    // pass missed; it is driven here directly with a seeded store.
    #[tokio::test]
    async fn eager_follow_up_activates_an_overdue_successor() {
        let store = Store::in_memory();
        let s = schedule();
        store.create_schedule(&s).await.unwrap();

        let start = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single().unwrap();
        let user = Uuid::new_v4();
        let expired = row(
            &s,
            user,
            s.course_ids[0],
            AssignmentStatus::Expired,
            start,
            start.checked_add_days(Days::new(21)).unwrap(),
        );
        let successor = row(
            &s,
            user,
            s.course_ids[1],
            AssignmentStatus::Pending,
            start.checked_add_days(Days::new(22)).unwrap(),
            start.checked_add_days(Days::new(43)).unwrap(),
        );
        store
            .insert_assignments(&[expired.clone(), successor.clone()])
            .await
            .unwrap();

        let advancer = LifecycleAdvancer::new(store.clone());
        let now = start.checked_add_days(Days::new(25)).unwrap();
        let advanced = advancer.advance_sequence(s.id, &expired, now).await.unwrap();
        assert_eq!(advanced, 1);

        let stored = store.get_assignment(successor.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentStatus::Active);
        assert!(stored.visible);
    }

    #[tokio::test]
    async fn eager_follow_up_leaves_a_future_successor_pending() {
        let store = Store::in_memory();
        let s = schedule();
        store.create_schedule(&s).await.unwrap();

        let start = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).single().unwrap();
        let user = Uuid::new_v4();
        let expired = row(
            &s,
            user,
            s.course_ids[0],
            AssignmentStatus::Expired,
            start,
            start.checked_add_days(Days::new(21)).unwrap(),
        );
        let successor = row(
            &s,
            user,
            s.course_ids[1],
            AssignmentStatus::Pending,
            start.checked_add_days(Days::new(22)).unwrap(),
            start.checked_add_days(Days::new(43)).unwrap(),
        );
        store
            .insert_assignments(&[expired.clone(), successor.clone()])
            .await
            .unwrap();

        let advancer = LifecycleAdvancer::new(store.clone());
        // The next window has not opened yet.
        let now = start.checked_add_days(Days::new(21)).unwrap();
        let advanced = advancer.advance_sequence(s.id, &expired, now).await.unwrap();
        assert_eq!(advanced, 0);

        let stored = store.get_assignment(successor.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AssignmentStatus::Pending);
        assert!(!stored.visible);
    }
}
