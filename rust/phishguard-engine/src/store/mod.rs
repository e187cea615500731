//! Schedule and assignment persistence.
//!
//! Provides trait-based abstractions for data access that work across
//! different backends. The in-memory store backs embedded deployments and
//! the test suite; a Postgres backend is available behind the `postgres`
//! feature.
//!
//! Every lifecycle write is a conditional update guarded on the expected
//! prior state ("set status = X where id = Y and status = prior"), so
//! concurrent sweeps naturally no-op on rows that were already moved instead
//! of racing.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Assignment, AssignmentStatus, Schedule};

/// Repository for schedule rows.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    /// Persist a new schedule.
    async fn create_schedule(&self, schedule: &Schedule) -> anyhow::Result<Uuid>;

    /// Fetch a schedule by id.
    async fn get_schedule(&self, id: Uuid) -> anyhow::Result<Option<Schedule>>;

    /// Replace an existing schedule.
    async fn update_schedule(&self, schedule: &Schedule) -> anyhow::Result<()>;

    /// Running, scheduled-policy schedules that have not started and whose
    /// launch instant has passed.
    async fn find_due_for_start(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Schedule>>;

    /// Flip the started marker. Returns false when another sweep already
    /// flipped it; exactly one caller ever sees true.
    async fn mark_started(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Move a running schedule to completed. Returns false when the
    /// schedule was not running.
    async fn mark_completed(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Delete a schedule and cascade-delete its assignments.
    async fn delete_schedule(&self, id: Uuid) -> anyhow::Result<bool>;
}

/// Repository for assignment rows.
#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    /// Bulk-insert assignments, silently skipping rows whose
    /// (user, course, schedule) triple already exists. Returns the number
    /// actually inserted.
    async fn insert_assignments(&self, rows: &[Assignment]) -> anyhow::Result<usize>;

    /// Fetch an assignment by id.
    async fn get_assignment(&self, id: Uuid) -> anyhow::Result<Option<Assignment>>;

    /// All assignments for a schedule, earliest launch first.
    async fn list_for_schedule(&self, schedule_id: Uuid) -> anyhow::Result<Vec<Assignment>>;

    /// Pending, not-yet-visible assignments whose launch instant has passed.
    async fn find_pending_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Assignment>>;

    /// Pending assignments of a schedule sitting in its earliest launch
    /// window, restricted to those whose launch instant has passed.
    async fn find_first_window_due(
        &self,
        schedule_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Assignment>>;

    /// Active assignments whose expiry instant has passed.
    async fn find_active_expired(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Assignment>>;

    /// Next pending assignment for (user, schedule) launching at or after
    /// `not_before`, earliest launch first.
    async fn next_pending_after(
        &self,
        schedule_id: Uuid,
        user_id: Uuid,
        not_before: DateTime<Utc>,
    ) -> anyhow::Result<Option<Assignment>>;

    /// Number of pending or active assignments left in a schedule.
    async fn count_open(&self, schedule_id: Uuid) -> anyhow::Result<u64>;

    /// Expired, schedule-owned assignments without a campaign reference
    /// whose expiry lies before `before`. Rows from earlier days stay
    /// eligible until a campaign is recorded, which is what makes failed
    /// launches retryable on later runs.
    async fn find_campaign_candidates(
        &self,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Assignment>>;

    /// Conditionally transition an assignment, guarded on the expected prior
    /// status. Returns false when the row was already moved elsewhere.
    async fn transition(
        &self,
        id: Uuid,
        from: AssignmentStatus,
        to: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Record a launched campaign: sets the campaign reference and moves the
    /// row to completed, guarded on `expired` with no reference set.
    /// Returns false when a reference was already recorded.
    async fn record_campaign(
        &self,
        id: Uuid,
        campaign_ref: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;
}

/// Store abstraction over the available backends.
#[derive(Clone)]
pub enum Store {
    /// Postgres-backed store.
    #[cfg(feature = "postgres")]
    Postgres(PostgresStore),
    /// In-memory store for embedded deployments and tests.
    InMemory(InMemoryStore),
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => write!(f, "Store::Postgres"),
            Self::InMemory(_) => write!(f, "Store::InMemory"),
        }
    }
}

impl Store {
    /// Create an in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::InMemory(InMemoryStore::new())
    }
}

macro_rules! dispatch {
    ($self:ident, $inner:ident => $call:expr) => {
        match $self {
            #[cfg(feature = "postgres")]
            Store::Postgres($inner) => $call,
            Store::InMemory($inner) => $call,
        }
    };
}

#[async_trait]
impl ScheduleRepository for Store {
    async fn create_schedule(&self, schedule: &Schedule) -> anyhow::Result<Uuid> {
        dispatch!(self, s => s.create_schedule(schedule).await)
    }

    async fn get_schedule(&self, id: Uuid) -> anyhow::Result<Option<Schedule>> {
        dispatch!(self, s => s.get_schedule(id).await)
    }

    async fn update_schedule(&self, schedule: &Schedule) -> anyhow::Result<()> {
        dispatch!(self, s => s.update_schedule(schedule).await)
    }

    async fn find_due_for_start(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Schedule>> {
        dispatch!(self, s => s.find_due_for_start(now).await)
    }

    async fn mark_started(&self, id: Uuid) -> anyhow::Result<bool> {
        dispatch!(self, s => s.mark_started(id).await)
    }

    async fn mark_completed(&self, id: Uuid) -> anyhow::Result<bool> {
        dispatch!(self, s => s.mark_completed(id).await)
    }

    async fn delete_schedule(&self, id: Uuid) -> anyhow::Result<bool> {
        dispatch!(self, s => s.delete_schedule(id).await)
    }
}

#[async_trait]
impl AssignmentRepository for Store {
    async fn insert_assignments(&self, rows: &[Assignment]) -> anyhow::Result<usize> {
        dispatch!(self, s => s.insert_assignments(rows).await)
    }

    async fn get_assignment(&self, id: Uuid) -> anyhow::Result<Option<Assignment>> {
        dispatch!(self, s => s.get_assignment(id).await)
    }

    async fn list_for_schedule(&self, schedule_id: Uuid) -> anyhow::Result<Vec<Assignment>> {
        dispatch!(self, s => s.list_for_schedule(schedule_id).await)
    }

    async fn find_pending_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Assignment>> {
        dispatch!(self, s => s.find_pending_due(now).await)
    }

    async fn find_first_window_due(
        &self,
        schedule_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Assignment>> {
        dispatch!(self, s => s.find_first_window_due(schedule_id, now).await)
    }

    async fn find_active_expired(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Assignment>> {
        dispatch!(self, s => s.find_active_expired(now).await)
    }

    async fn next_pending_after(
        &self,
        schedule_id: Uuid,
        user_id: Uuid,
        not_before: DateTime<Utc>,
    ) -> anyhow::Result<Option<Assignment>> {
        dispatch!(self, s => s.next_pending_after(schedule_id, user_id, not_before).await)
    }

    async fn count_open(&self, schedule_id: Uuid) -> anyhow::Result<u64> {
        dispatch!(self, s => s.count_open(schedule_id).await)
    }

    async fn find_campaign_candidates(
        &self,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Assignment>> {
        dispatch!(self, s => s.find_campaign_candidates(before).await)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: AssignmentStatus,
        to: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        dispatch!(self, s => s.transition(id, from, to, now).await)
    }

    async fn record_campaign(
        &self,
        id: Uuid,
        campaign_ref: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        dispatch!(self, s => s.record_campaign(id, campaign_ref, now).await)
    }
}
