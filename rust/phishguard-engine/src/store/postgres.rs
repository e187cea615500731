//! Postgres store backend.
//!
//! Runtime-checked sqlx queries; every lifecycle write is a guarded
//! `UPDATE ... WHERE status = prior` so concurrent sweeps no-op instead of
//! racing. Enabled with the `postgres` cargo feature.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::domain::{Assignment, AssignmentStatus, CampaignKind, Schedule, ScheduleStatus};

use super::{AssignmentRepository, ScheduleRepository};

/// Schema bootstrap, applied idempotently at connect time.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS schedules (
    id          UUID PRIMARY KEY,
    name        TEXT NOT NULL,
    group_ids   JSONB NOT NULL DEFAULT '[]',
    user_ids    JSONB NOT NULL DEFAULT '[]',
    course_ids  JSONB NOT NULL DEFAULT '[]',
    kind        TEXT NOT NULL,
    policy      JSONB NOT NULL,
    status      TEXT NOT NULL,
    started     BOOLEAN NOT NULL DEFAULT FALSE,
    starts_at   TIMESTAMPTZ,
    created_at  TIMESTAMPTZ NOT NULL,
    updated_at  TIMESTAMPTZ NOT NULL
);

CREATE TABLE IF NOT EXISTS assignments (
    id           UUID PRIMARY KEY,
    user_id      UUID NOT NULL,
    course_id    UUID NOT NULL,
    schedule_id  UUID REFERENCES schedules(id) ON DELETE CASCADE,
    launch_at    TIMESTAMPTZ,
    expires_at   TIMESTAMPTZ,
    status       TEXT NOT NULL,
    visible      BOOLEAN NOT NULL DEFAULT FALSE,
    campaign_ref TEXT,
    created_at   TIMESTAMPTZ NOT NULL,
    updated_at   TIMESTAMPTZ NOT NULL,
    UNIQUE NULLS NOT DISTINCT (user_id, course_id, schedule_id)
);

CREATE INDEX IF NOT EXISTS idx_assignments_status_launch
    ON assignments (status, launch_at);
CREATE INDEX IF NOT EXISTS idx_assignments_status_expires
    ON assignments (status, expires_at);
CREATE INDEX IF NOT EXISTS idx_schedules_start
    ON schedules (status, started, starts_at);
";

/// Postgres-backed schedule/assignment store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to the database and apply the schema.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new().max_connections(8).connect(url).await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

fn schedule_from_row(row: &PgRow) -> anyhow::Result<Schedule> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    Ok(Schedule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        group_ids: serde_json::from_value(row.try_get("group_ids")?)?,
        user_ids: serde_json::from_value(row.try_get("user_ids")?)?,
        course_ids: serde_json::from_value(row.try_get("course_ids")?)?,
        kind: CampaignKind::from_str(&kind).map_err(|e| anyhow::anyhow!(e))?,
        policy: serde_json::from_value(row.try_get("policy")?)?,
        status: ScheduleStatus::from_str(&status).map_err(|e| anyhow::anyhow!(e))?,
        started: row.try_get("started")?,
        starts_at: row.try_get("starts_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn assignment_from_row(row: &PgRow) -> anyhow::Result<Assignment> {
    let status: String = row.try_get("status")?;
    Ok(Assignment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        course_id: row.try_get("course_id")?,
        schedule_id: row.try_get("schedule_id")?,
        launch_at: row.try_get("launch_at")?,
        expires_at: row.try_get("expires_at")?,
        status: AssignmentStatus::from_str(&status).map_err(|e| anyhow::anyhow!(e))?,
        visible: row.try_get("visible")?,
        campaign_ref: row.try_get("campaign_ref")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl ScheduleRepository for PostgresStore {
    async fn create_schedule(&self, schedule: &Schedule) -> anyhow::Result<Uuid> {
        sqlx::query(
            "INSERT INTO schedules \
             (id, name, group_ids, user_ids, course_ids, kind, policy, status, started, starts_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(schedule.id)
        .bind(&schedule.name)
        .bind(serde_json::to_value(&schedule.group_ids)?)
        .bind(serde_json::to_value(&schedule.user_ids)?)
        .bind(serde_json::to_value(&schedule.course_ids)?)
        .bind(schedule.kind.to_string())
        .bind(serde_json::to_value(&schedule.policy)?)
        .bind(schedule.status.to_string())
        .bind(schedule.started)
        .bind(schedule.starts_at)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(schedule.id)
    }

    async fn get_schedule(&self, id: Uuid) -> anyhow::Result<Option<Schedule>> {
        let row = sqlx::query("SELECT * FROM schedules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn update_schedule(&self, schedule: &Schedule) -> anyhow::Result<()> {
        let result = sqlx::query(
            "UPDATE schedules SET \
             name = $2, group_ids = $3, user_ids = $4, course_ids = $5, kind = $6, \
             policy = $7, status = $8, started = $9, starts_at = $10, updated_at = $11 \
             WHERE id = $1",
        )
        .bind(schedule.id)
        .bind(&schedule.name)
        .bind(serde_json::to_value(&schedule.group_ids)?)
        .bind(serde_json::to_value(&schedule.user_ids)?)
        .bind(serde_json::to_value(&schedule.course_ids)?)
        .bind(schedule.kind.to_string())
        .bind(serde_json::to_value(&schedule.policy)?)
        .bind(schedule.status.to_string())
        .bind(schedule.started)
        .bind(schedule.starts_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("schedule not found: {}", schedule.id);
        }
        Ok(())
    }

    async fn find_due_for_start(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Schedule>> {
        let rows = sqlx::query(
            "SELECT * FROM schedules \
             WHERE status = 'running' AND started = FALSE \
             AND starts_at IS NOT NULL AND starts_at <= $1 \
             AND policy->>'policy' = 'scheduled'",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn mark_started(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE schedules SET started = TRUE, updated_at = NOW() \
             WHERE id = $1 AND started = FALSE",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE schedules SET status = 'completed', updated_at = NOW() \
             WHERE id = $1 AND status = 'running'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_schedule(&self, id: Uuid) -> anyhow::Result<bool> {
        // Assignments cascade via the foreign key.
        let result = sqlx::query("DELETE FROM schedules WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl AssignmentRepository for PostgresStore {
    async fn insert_assignments(&self, rows: &[Assignment]) -> anyhow::Result<usize> {
        let mut inserted = 0;
        for row in rows {
            let result = sqlx::query(
                "INSERT INTO assignments \
                 (id, user_id, course_id, schedule_id, launch_at, expires_at, status, visible, campaign_ref, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT (user_id, course_id, schedule_id) DO NOTHING",
            )
            .bind(row.id)
            .bind(row.user_id)
            .bind(row.course_id)
            .bind(row.schedule_id)
            .bind(row.launch_at)
            .bind(row.expires_at)
            .bind(row.status.to_string())
            .bind(row.visible)
            .bind(&row.campaign_ref)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(&self.pool)
            .await?;
            inserted += usize::try_from(result.rows_affected())?;
        }
        Ok(inserted)
    }

    async fn get_assignment(&self, id: Uuid) -> anyhow::Result<Option<Assignment>> {
        let row = sqlx::query("SELECT * FROM assignments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(assignment_from_row).transpose()
    }

    async fn list_for_schedule(&self, schedule_id: Uuid) -> anyhow::Result<Vec<Assignment>> {
        let rows = sqlx::query(
            "SELECT * FROM assignments WHERE schedule_id = $1 ORDER BY launch_at ASC",
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(assignment_from_row).collect()
    }

    async fn find_pending_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Assignment>> {
        let rows = sqlx::query(
            "SELECT * FROM assignments \
             WHERE status = 'pending' AND visible = FALSE \
             AND launch_at IS NOT NULL AND launch_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(assignment_from_row).collect()
    }

    async fn find_first_window_due(
        &self,
        schedule_id: Uuid,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Assignment>> {
        let rows = sqlx::query(
            "SELECT * FROM assignments \
             WHERE schedule_id = $1 AND status = 'pending' AND launch_at <= $2 \
             AND launch_at = (SELECT MIN(launch_at) FROM assignments WHERE schedule_id = $1)",
        )
        .bind(schedule_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(assignment_from_row).collect()
    }

    async fn find_active_expired(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Assignment>> {
        let rows = sqlx::query(
            "SELECT * FROM assignments \
             WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(assignment_from_row).collect()
    }

    async fn next_pending_after(
        &self,
        schedule_id: Uuid,
        user_id: Uuid,
        not_before: DateTime<Utc>,
    ) -> anyhow::Result<Option<Assignment>> {
        let row = sqlx::query(
            "SELECT * FROM assignments \
             WHERE schedule_id = $1 AND user_id = $2 AND status = 'pending' \
             AND launch_at >= $3 \
             ORDER BY launch_at ASC LIMIT 1",
        )
        .bind(schedule_id)
        .bind(user_id)
        .bind(not_before)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(assignment_from_row).transpose()
    }

    async fn count_open(&self, schedule_id: Uuid) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM assignments \
             WHERE schedule_id = $1 AND status IN ('pending', 'active')",
        )
        .bind(schedule_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count)?)
    }

    async fn find_campaign_candidates(
        &self,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Assignment>> {
        let rows = sqlx::query(
            "SELECT * FROM assignments \
             WHERE status = 'expired' AND campaign_ref IS NULL \
             AND schedule_id IS NOT NULL \
             AND expires_at < $1",
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(assignment_from_row).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: AssignmentStatus,
        to: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE assignments SET status = $3, visible = $4, updated_at = $5 \
             WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(from.to_string())
        .bind(to.to_string())
        .bind(to == AssignmentStatus::Active)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn record_campaign(
        &self,
        id: Uuid,
        campaign_ref: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE assignments \
             SET campaign_ref = $2, status = 'completed', visible = FALSE, updated_at = $3 \
             WHERE id = $1 AND status = 'expired' AND campaign_ref IS NULL",
        )
        .bind(id)
        .bind(campaign_ref)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
