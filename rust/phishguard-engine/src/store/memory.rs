//! In-memory store backend.
//!
//! Backs embedded deployments and the test suite. Conditional updates are
//! applied under the write lock, which gives them the same winner-takes-all
//! semantics as a guarded SQL `UPDATE ... WHERE status = prior`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::{Assignment, AssignmentStatus, Schedule, ScheduleStatus};

use super::{AssignmentRepository, ScheduleRepository};

/// In-memory store for embedded deployments and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    schedules: Arc<RwLock<HashMap<Uuid, Schedule>>>,
    assignments: Arc<RwLock<HashMap<Uuid, Assignment>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryStore {
    async fn create_schedule(&self, schedule: &Schedule) -> anyhow::Result<Uuid> {
        let mut schedules = self.schedules.write();
        schedules.insert(schedule.id, schedule.clone());
        Ok(schedule.id)
    }

    async fn get_schedule(&self, id: Uuid) -> anyhow::Result<Option<Schedule>> {
        Ok(self.schedules.read().get(&id).cloned())
    }

    async fn update_schedule(&self, schedule: &Schedule) -> anyhow::Result<()> {
        let mut schedules = self.schedules.write();
        if !schedules.contains_key(&schedule.id) {
            anyhow::bail!("schedule not found: {}", schedule.id);
        }
        schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn find_due_for_start(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Schedule>> {
        let schedules = self.schedules.read();
        Ok(schedules
            .values()
            .filter(|s| {
                s.status == ScheduleStatus::Running
                    && !s.started
                    && !s.policy.is_immediate()
                    && s.starts_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect())
    }

    async fn mark_started(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut schedules = self.schedules.write();
        match schedules.get_mut(&id) {
            Some(schedule) if !schedule.started => {
                schedule.started = true;
                schedule.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => anyhow::bail!("schedule not found: {id}"),
        }
    }

    async fn mark_completed(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut schedules = self.schedules.write();
        match schedules.get_mut(&id) {
            Some(schedule) if schedule.status == ScheduleStatus::Running => {
                schedule.status = ScheduleStatus::Completed;
                schedule.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => anyhow::bail!("schedule not found: {id}"),
        }
    }

    async fn delete_schedule(&self, id: Uuid) -> anyhow::Result<bool> {
        let removed = self.schedules.write().remove(&id).is_some();
        if removed {
            // Cascade: a schedule is never deleted while assignments
            // reference it.
            self.assignments
                .write()
                .retain(|_, a| a.schedule_id != Some(id));
        }
        Ok(removed)
    }
}

#[async_trait]
impl AssignmentRepository for InMemoryStore {
    async fn insert_assignments(&self, rows: &[Assignment]) -> anyhow::Result<usize> {
        let mut assignments = self.assignments.write();
        let mut inserted = 0;
        for row in rows {
            let duplicate = assignments.values().any(|existing| {
                existing.user_id == row.user_id
                    && existing.course_id == row.course_id
                    && existing.schedule_id == row.schedule_id
            });
            if duplicate {
                continue;
            }
            assignments.insert(row.id, row.clone());
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn get_assignment(&self, id: Uuid) -> anyhow::Result<Option<Assignment>> {
        Ok(self.assignments.read().get(&id).cloned())
    }

    async fn list_for_schedule(&self, schedule_id: Uuid) -> anyhow::Result<Vec<Assignment>> {
        let assignments = self.assignments.read();
        let mut rows: Vec<_> = assignments
            .values()
            .filter(|a| a.schedule_id == Some(schedule_id))
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.launch_at);
        Ok(rows)
    }

    async fn find_pending_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Assignment>> {
        let assignments = self.assignments.read();
        Ok(assignments
            .values()
            .filter(|a| {
                a.status == AssignmentStatus::Pending
                    && !a.visible
                    && a.launch_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect())
    }

    async fn find_first_window_due(
        &self,
        schedule_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Assignment>> {
        let assignments = self.assignments.read();
        let earliest = assignments
            .values()
            .filter(|a| a.schedule_id == Some(schedule_id))
            .filter_map(|a| a.launch_at)
            .min();
        let Some(earliest) = earliest else {
            return Ok(Vec::new());
        };
        Ok(assignments
            .values()
            .filter(|a| {
                a.schedule_id == Some(schedule_id)
                    && a.status == AssignmentStatus::Pending
                    && a.launch_at == Some(earliest)
                    && earliest <= now
            })
            .cloned()
            .collect())
    }

    async fn find_active_expired(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Assignment>> {
        let assignments = self.assignments.read();
        Ok(assignments
            .values()
            .filter(|a| {
                a.status == AssignmentStatus::Active && a.expires_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect())
    }

    async fn next_pending_after(
        &self,
        schedule_id: Uuid,
        user_id: Uuid,
        not_before: DateTime<Utc>,
    ) -> anyhow::Result<Option<Assignment>> {
        let assignments = self.assignments.read();
        Ok(assignments
            .values()
            .filter(|a| {
                a.schedule_id == Some(schedule_id)
                    && a.user_id == user_id
                    && a.status == AssignmentStatus::Pending
                    && a.launch_at.is_some_and(|at| at >= not_before)
            })
            .min_by_key(|a| a.launch_at)
            .cloned())
    }

    async fn count_open(&self, schedule_id: Uuid) -> anyhow::Result<u64> {
        let assignments = self.assignments.read();
        Ok(assignments
            .values()
            .filter(|a| a.schedule_id == Some(schedule_id) && a.status.is_open())
            .count() as u64)
    }

    async fn find_campaign_candidates(
        &self,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Assignment>> {
        let assignments = self.assignments.read();
        Ok(assignments
            .values()
            .filter(|a| {
                a.status == AssignmentStatus::Expired
                    && a.campaign_ref.is_none()
                    && a.schedule_id.is_some()
                    && a.expires_at.is_some_and(|at| at < before)
            })
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: AssignmentStatus,
        to: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut assignments = self.assignments.write();
        let Some(assignment) = assignments.get_mut(&id) else {
            anyhow::bail!("assignment not found: {id}");
        };
        if assignment.status != from {
            return Ok(false);
        }
        assignment.transition(to, now)?;
        Ok(true)
    }

    async fn record_campaign(
        &self,
        id: Uuid,
        campaign_ref: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut assignments = self.assignments.write();
        let Some(assignment) = assignments.get_mut(&id) else {
            anyhow::bail!("assignment not found: {id}");
        };
        if assignment.campaign_ref.is_some() || assignment.status != AssignmentStatus::Expired {
            return Ok(false);
        }
        assignment.campaign_ref = Some(campaign_ref.to_string());
        assignment.transition(AssignmentStatus::Completed, now)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CampaignKind, LaunchPolicy};

    fn schedule(starts_at: Option<DateTime<Utc>>) -> Schedule {
        let now = Utc::now();
        Schedule {
            id: Uuid::new_v4(),
            name: "store test".to_string(),
            group_ids: vec![Uuid::new_v4()],
            user_ids: vec![],
            course_ids: vec![Uuid::new_v4()],
            kind: CampaignKind::PhishingAwareness,
            policy: LaunchPolicy::Scheduled {
                date: chrono::NaiveDate::from_ymd_opt(2030, 1, 1).unwrap(),
                time: chrono::NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                timezone: chrono_tz::Tz::UTC,
            },
            status: ScheduleStatus::Running,
            started: false,
            starts_at,
            created_at: now,
            updated_at: now,
        }
    }

    fn assignment(schedule_id: Option<Uuid>, status: AssignmentStatus) -> Assignment {
        let now = Utc::now();
        Assignment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            schedule_id,
            launch_at: Some(now),
            expires_at: Some(now),
            status,
            visible: status == AssignmentStatus::Active,
            campaign_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn mark_started_is_first_winner_only() {
        let store = InMemoryStore::new();
        let s = schedule(Some(Utc::now()));
        store.create_schedule(&s).await.unwrap();

        assert!(store.mark_started(s.id).await.unwrap());
        assert!(!store.mark_started(s.id).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_triples_are_skipped_on_insert() {
        let store = InMemoryStore::new();
        let a = assignment(Some(Uuid::new_v4()), AssignmentStatus::Pending);
        assert_eq!(store.insert_assignments(&[a.clone()]).await.unwrap(), 1);

        // Same triple under a fresh row id.
        let mut dup = a.clone();
        dup.id = Uuid::new_v4();
        assert_eq!(store.insert_assignments(&[dup]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn conditional_transition_noops_when_prior_state_moved() {
        let store = InMemoryStore::new();
        let a = assignment(Some(Uuid::new_v4()), AssignmentStatus::Pending);
        store.insert_assignments(&[a.clone()]).await.unwrap();
        let now = Utc::now();

        assert!(store
            .transition(a.id, AssignmentStatus::Pending, AssignmentStatus::Active, now)
            .await
            .unwrap());
        // Second activation attempt no-ops.
        assert!(!store
            .transition(a.id, AssignmentStatus::Pending, AssignmentStatus::Active, now)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn record_campaign_sets_reference_once() {
        let store = InMemoryStore::new();
        let a = assignment(Some(Uuid::new_v4()), AssignmentStatus::Expired);
        store.insert_assignments(&[a.clone()]).await.unwrap();
        let now = Utc::now();

        assert!(store.record_campaign(a.id, "cmp-1", now).await.unwrap());
        assert!(!store.record_campaign(a.id, "cmp-2", now).await.unwrap());

        let row = store.get_assignment(a.id).await.unwrap().unwrap();
        assert_eq!(row.campaign_ref.as_deref(), Some("cmp-1"));
        assert_eq!(row.status, AssignmentStatus::Completed);
    }

    #[tokio::test]
    async fn cascade_delete_removes_assignments() {
        let store = InMemoryStore::new();
        let s = schedule(Some(Utc::now()));
        store.create_schedule(&s).await.unwrap();
        let a = assignment(Some(s.id), AssignmentStatus::Pending);
        store.insert_assignments(&[a.clone()]).await.unwrap();

        assert!(store.delete_schedule(s.id).await.unwrap());
        assert!(store.get_assignment(a.id).await.unwrap().is_none());
    }
}
