//! Assignment entity and lifecycle state machine.
//!
//! An assignment is one (user, course) pairing with its own launch/expiry
//! window. The status sequence is strictly `pending -> active -> expired ->
//! completed`: no state is skipped and no transition moves backward.
//! `completed` is terminal and is only reached through the campaign launcher;
//! an assignment outside any schedule may stay `expired` forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LifecycleError;

/// Assignment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// Waiting for its launch window.
    Pending,
    /// Window open; visible to the learner.
    Active,
    /// Window closed; awaiting a follow-up campaign, if any.
    Expired,
    /// Follow-up campaign has been attempted. Terminal.
    Completed,
}

impl AssignmentStatus {
    /// Whether this status may move to `next`.
    ///
    /// The machine admits exactly three edges; everything else is a
    /// processor race and is rejected.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active)
                | (Self::Active, Self::Expired)
                | (Self::Expired, Self::Completed)
        )
    }

    /// Whether the assignment still counts against schedule completion.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Expired => write!(f, "expired"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for AssignmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Unknown assignment status: {s}")),
        }
    }
}

/// One (user, course) enrollment with its own launch/expiry window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Unique assignment identifier.
    pub id: Uuid,
    /// Enrolled user.
    pub user_id: Uuid,
    /// Assigned course.
    pub course_id: Uuid,
    /// Owning schedule. `None` for direct enrollments, which never trigger
    /// follow-up campaigns.
    pub schedule_id: Option<Uuid>,
    /// Window open instant (UTC). `None` until computed.
    pub launch_at: Option<DateTime<Utc>>,
    /// Window close instant (UTC). `None` until computed.
    pub expires_at: Option<DateTime<Utc>>,
    /// Lifecycle status.
    pub status: AssignmentStatus,
    /// True only while the assignment is active.
    pub visible: bool,
    /// Identifier of the campaign launched for this assignment. Set at most
    /// once; its presence is the duplicate-launch guard.
    pub campaign_ref: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    /// Apply a lifecycle transition, keeping visibility in sync.
    ///
    /// Rejects skipped or backward moves with [`LifecycleError`]; callers
    /// treat that as a processor race and log loudly.
    pub fn transition(
        &mut self,
        next: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        if !self.status.can_transition_to(next) {
            return Err(LifecycleError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.visible = next == AssignmentStatus::Active;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(status: AssignmentStatus) -> Assignment {
        let now = Utc::now();
        Assignment {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            schedule_id: Some(Uuid::new_v4()),
            launch_at: Some(now),
            expires_at: Some(now),
            status,
            visible: status == AssignmentStatus::Active,
            campaign_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn forward_edges_allowed() {
        assert!(AssignmentStatus::Pending.can_transition_to(AssignmentStatus::Active));
        assert!(AssignmentStatus::Active.can_transition_to(AssignmentStatus::Expired));
        assert!(AssignmentStatus::Expired.can_transition_to(AssignmentStatus::Completed));
    }

    #[test]
    fn skipped_and_backward_edges_rejected() {
        assert!(!AssignmentStatus::Pending.can_transition_to(AssignmentStatus::Expired));
        assert!(!AssignmentStatus::Pending.can_transition_to(AssignmentStatus::Completed));
        assert!(!AssignmentStatus::Active.can_transition_to(AssignmentStatus::Completed));
        assert!(!AssignmentStatus::Active.can_transition_to(AssignmentStatus::Pending));
        assert!(!AssignmentStatus::Expired.can_transition_to(AssignmentStatus::Active));
        assert!(!AssignmentStatus::Completed.can_transition_to(AssignmentStatus::Pending));
    }

    #[test]
    fn activation_sets_visibility() {
        let mut a = assignment(AssignmentStatus::Pending);
        a.transition(AssignmentStatus::Active, Utc::now()).unwrap();
        assert_eq!(a.status, AssignmentStatus::Active);
        assert!(a.visible);
    }

    #[test]
    fn expiry_clears_visibility() {
        let mut a = assignment(AssignmentStatus::Active);
        a.transition(AssignmentStatus::Expired, Utc::now()).unwrap();
        assert_eq!(a.status, AssignmentStatus::Expired);
        assert!(!a.visible);
    }

    #[test]
    fn invalid_transition_reports_states() {
        let mut a = assignment(AssignmentStatus::Expired);
        let err = a
            .transition(AssignmentStatus::Active, Utc::now())
            .unwrap_err();
        assert_eq!(err.from, AssignmentStatus::Expired);
        assert_eq!(err.to, AssignmentStatus::Active);
        // State untouched after a rejected transition.
        assert_eq!(a.status, AssignmentStatus::Expired);
    }

    #[test]
    fn open_statuses() {
        assert!(AssignmentStatus::Pending.is_open());
        assert!(AssignmentStatus::Active.is_open());
        assert!(!AssignmentStatus::Expired.is_open());
        assert!(!AssignmentStatus::Completed.is_open());
        assert!(AssignmentStatus::Completed.is_terminal());
    }
}
