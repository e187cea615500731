//! Engine error types.
//!
//! Three families of failure exist in this engine: validation errors raised
//! synchronously at schedule-creation/expansion time, lifecycle invariant
//! violations raised by the assignment state machine, and campaign platform
//! errors raised by the outbound adapter. Per-row failures inside a sweep are
//! logged and skipped; none of these errors ever terminates a periodic task.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::AssignmentStatus;

/// Errors rejected synchronously when a schedule is validated or expanded.
///
/// A failed expansion persists nothing: validation and audience resolution
/// complete before the first assignment row is written.
#[derive(Debug, Error)]
pub enum ExpansionError {
    /// The schedule references no courses.
    #[error("schedule has no courses")]
    NoCourses,

    /// Neither groups nor direct users were referenced.
    #[error("schedule targets no groups and no users")]
    NoAudience,

    /// Group resolution produced zero deliverable recipients.
    #[error("resolved audience is empty; schedule requires at least one recipient")]
    EmptyAudience,

    /// A referenced course id does not exist in the catalog.
    #[error("unknown course: {0}")]
    UnknownCourse(Uuid),

    /// The scheduled launch moment is not strictly in the future.
    #[error("scheduled launch {launch_at} has already passed (now: {now})")]
    LaunchNotInFuture {
        launch_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// The configured wall-clock time does not exist in the schedule's zone
    /// (skipped by a DST transition).
    #[error("local time {local} does not exist in timezone {timezone}")]
    NonexistentLocalTime { local: String, timezone: String },

    /// Window arithmetic walked off the end of the calendar.
    #[error("course window {index} overflows the supported date range")]
    WindowOverflow { index: usize },

    /// A group or user reference failed to resolve.
    #[error("audience resolution failed")]
    Directory(#[source] anyhow::Error),

    /// The schedule or assignment store rejected a read/write.
    #[error("store operation failed")]
    Store(#[source] anyhow::Error),
}

/// Invariant violation in the assignment state machine.
///
/// These indicate a processor race and should never occur under correct
/// scheduling; callers log them at error level.
#[derive(Debug, Error)]
#[error("invalid assignment transition {from} -> {to}")]
pub struct LifecycleError {
    /// State the assignment was in.
    pub from: AssignmentStatus,
    /// State the caller attempted to move to.
    pub to: AssignmentStatus,
}

/// Errors from the external campaign platform adapter.
///
/// All of these are transient from the engine's point of view: the owning
/// assignment keeps its `expired` status and is retried on the next sweep.
#[derive(Debug, Error)]
pub enum CampaignError {
    /// The platform answered with a non-2xx status.
    #[error("campaign platform returned {status}: {body}")]
    Platform { status: u16, body: String },

    /// The request never completed (connect failure, timeout).
    #[error("campaign platform request failed")]
    Transport(#[from] reqwest::Error),

    /// The platform answered 2xx but the body was not understood.
    #[error("campaign platform response could not be parsed")]
    Malformed(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_error_names_both_states() {
        let err = LifecycleError {
            from: AssignmentStatus::Expired,
            to: AssignmentStatus::Pending,
        };
        let msg = err.to_string();
        assert!(msg.contains("expired"));
        assert!(msg.contains("pending"));
    }

    #[test]
    fn expansion_error_display() {
        let err = ExpansionError::EmptyAudience;
        assert!(err.to_string().contains("at least one recipient"));
    }
}
