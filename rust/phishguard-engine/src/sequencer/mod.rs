//! Course window computation and schedule expansion.
//!
//! The sequencer is the fan-out point: one schedule definition becomes one
//! assignment row per (user, course) pair. Window arithmetic is pure and
//! done in calendar days in the schedule's own timezone, so a window that
//! crosses a DST transition still opens and closes at the same wall-clock
//! time.

use std::sync::Arc;

use chrono::{DateTime, Days, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::directory::{AudienceResolver, CourseCatalog};
use crate::domain::{Assignment, AssignmentStatus, Schedule, ScheduleStatus};
use crate::error::ExpansionError;
use crate::store::{AssignmentRepository, ScheduleRepository, Store};

/// Window policy constants.
///
/// The observed production values are a 21-day course window with a 1-day
/// gap between consecutive courses. They are configuration with those
/// defaults rather than literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequencerConfig {
    /// Days a course stays available once launched.
    pub window_days: u64,
    /// Days between one course's expiry and the next course's launch.
    pub gap_days: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            window_days: 21,
            gap_days: 1,
        }
    }
}

/// Launch/expiry window for one course index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CourseWindow {
    /// Position in the schedule's course list.
    pub index: usize,
    /// Window open instant (UTC).
    pub launch_at: DateTime<Utc>,
    /// Window close instant (UTC).
    pub expires_at: DateTime<Utc>,
}

fn add_days(
    at: DateTime<Utc>,
    timezone: Tz,
    days: u64,
    index: usize,
) -> Result<DateTime<Utc>, ExpansionError> {
    at.with_timezone(&timezone)
        .checked_add_days(Days::new(days))
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or(ExpansionError::WindowOverflow { index })
}

/// Compute the ordered launch/expiry windows for `count` courses.
///
/// `launch[0]` is the schedule's own launch moment; for every following
/// index, `launch[i] = expiry[i-1] + gap` and `expiry[i] = launch[i] +
/// window`, with day arithmetic carried out in `timezone`.
pub fn course_windows(
    start: DateTime<Utc>,
    timezone: Tz,
    count: usize,
    config: &SequencerConfig,
) -> Result<Vec<CourseWindow>, ExpansionError> {
    let mut windows = Vec::with_capacity(count);
    let mut launch_at = start;
    for index in 0..count {
        if index > 0 {
            launch_at = add_days(launch_at, timezone, config.gap_days, index)?;
        }
        let expires_at = add_days(launch_at, timezone, config.window_days, index)?;
        windows.push(CourseWindow {
            index,
            launch_at,
            expires_at,
        });
        launch_at = expires_at;
    }
    Ok(windows)
}

/// Outcome of one expansion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpansionSummary {
    /// Distinct users targeted.
    pub users: usize,
    /// Course windows computed.
    pub courses: usize,
    /// Assignment rows actually inserted (duplicates skipped).
    pub inserted: usize,
}

/// Expands a schedule into per-user course assignments.
#[derive(Clone)]
pub struct Sequencer {
    store: Store,
    audience: Arc<dyn AudienceResolver>,
    catalog: Arc<dyn CourseCatalog>,
    config: SequencerConfig,
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Sequencer {
    /// Create a sequencer over the given store and directory.
    pub fn new(
        store: Store,
        audience: Arc<dyn AudienceResolver>,
        catalog: Arc<dyn CourseCatalog>,
        config: SequencerConfig,
    ) -> Self {
        Self {
            store,
            audience,
            catalog,
            config,
        }
    }

    /// Expand a schedule into assignment rows as of `now`.
    ///
    /// Validation and audience/course resolution complete before anything is
    /// written: an unresolvable reference or an empty audience rejects the
    /// whole expansion with no partial rows. Re-running the expansion is
    /// idempotent because existing (user, course, schedule) triples are
    /// skipped at insert time.
    ///
    /// Immediate-policy schedules launch from `now`: the schedule goes
    /// running+started and index-0 assignments are created active and
    /// visible. Scheduled-policy schedules get only pending rows; the
    /// starter sweep activates the first window when the trigger arrives.
    pub async fn expand(
        &self,
        schedule: &mut Schedule,
        now: DateTime<Utc>,
    ) -> Result<ExpansionSummary, ExpansionError> {
        schedule.validate(now)?;

        for course_id in &schedule.course_ids {
            let known = self
                .catalog
                .course(*course_id)
                .await
                .map_err(ExpansionError::Directory)?;
            if known.is_none() {
                return Err(ExpansionError::UnknownCourse(*course_id));
            }
        }

        let users = self
            .audience
            .resolve_users(&schedule.group_ids, &schedule.user_ids)
            .await
            .map_err(ExpansionError::Directory)?;
        if users.is_empty() {
            return Err(ExpansionError::EmptyAudience);
        }

        let immediate = schedule.policy.is_immediate();
        let start = match schedule.policy.trigger_at()? {
            Some(trigger) => trigger,
            None => now,
        };
        let windows = course_windows(
            start,
            schedule.timezone(),
            schedule.course_ids.len(),
            &self.config,
        )?;

        let mut rows = Vec::with_capacity(users.len() * windows.len());
        for user_id in &users {
            for window in &windows {
                // An immediate launch opens the first window right away.
                let active_now = immediate && window.index == 0;
                rows.push(Assignment {
                    id: Uuid::new_v4(),
                    user_id: *user_id,
                    course_id: schedule.course_ids[window.index],
                    schedule_id: Some(schedule.id),
                    launch_at: Some(window.launch_at),
                    expires_at: Some(window.expires_at),
                    status: if active_now {
                        AssignmentStatus::Active
                    } else {
                        AssignmentStatus::Pending
                    },
                    visible: active_now,
                    campaign_ref: None,
                    created_at: now,
                    updated_at: now,
                });
            }
        }

        let inserted = self
            .store
            .insert_assignments(&rows)
            .await
            .map_err(ExpansionError::Store)?;

        schedule.starts_at = Some(start);
        schedule.status = ScheduleStatus::Running;
        schedule.started = immediate;
        schedule.updated_at = now;
        self.store
            .update_schedule(schedule)
            .await
            .map_err(ExpansionError::Store)?;

        tracing::info!(
            schedule_id = %schedule.id,
            users = users.len(),
            courses = windows.len(),
            inserted,
            "Schedule expanded"
        );

        Ok(ExpansionSummary {
            users: users.len(),
            courses: windows.len(),
            inserted,
        })
    }
}
