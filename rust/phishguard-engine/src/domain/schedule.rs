//! Schedule entity and launch policy.
//!
//! A schedule is one phishing-awareness training campaign definition: a
//! target audience (groups and/or direct users), an ordered course list, and
//! a launch policy that either starts immediately or at a future wall-clock
//! moment in a named IANA timezone.

use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ExpansionError;

/// Kind of follow-up campaign the schedule drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignKind {
    /// Baseline phishing-awareness training.
    PhishingAwareness,
    /// Advanced training for previously-phished users.
    AdvancedTraining,
}

impl std::fmt::Display for CampaignKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PhishingAwareness => write!(f, "phishing_awareness"),
            Self::AdvancedTraining => write!(f, "advanced_training"),
        }
    }
}

impl std::str::FromStr for CampaignKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "phishing_awareness" | "phishing-awareness" => Ok(Self::PhishingAwareness),
            "advanced_training" | "advanced-training" => Ok(Self::AdvancedTraining),
            _ => Err(format!("Unknown campaign kind: {s}")),
        }
    }
}

/// Schedule status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    /// Being edited, not yet expanded.
    Draft,
    /// Expanded; assignments are moving through their lifecycle.
    Running,
    /// Every assignment has left the pending/active set.
    Completed,
    /// Cancelled by an operator.
    Cancelled,
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(Self::Draft),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown schedule status: {s}")),
        }
    }
}

/// When the first course window opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum LaunchPolicy {
    /// The first window opens the moment the schedule is expanded.
    Immediate,
    /// The first window opens at a wall-clock moment in a named zone.
    Scheduled {
        /// Calendar launch date.
        date: NaiveDate,
        /// Wall-clock launch time.
        time: NaiveTime,
        /// IANA timezone the date and time are interpreted in.
        timezone: Tz,
    },
}

impl LaunchPolicy {
    /// Whether this policy launches at expansion time.
    #[must_use]
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate)
    }

    /// Resolve the deferred launch moment to a UTC instant.
    ///
    /// Returns `None` for the immediate policy. A wall-clock time that falls
    /// in a DST fold resolves to the earlier instant; a time skipped by a
    /// DST transition is an error.
    pub fn trigger_at(&self) -> Result<Option<DateTime<Utc>>, ExpansionError> {
        match self {
            Self::Immediate => Ok(None),
            Self::Scheduled {
                date,
                time,
                timezone,
            } => {
                let local = date.and_time(*time);
                let resolved = match timezone.from_local_datetime(&local) {
                    LocalResult::Single(dt) => dt,
                    LocalResult::Ambiguous(earliest, _) => earliest,
                    LocalResult::None => {
                        return Err(ExpansionError::NonexistentLocalTime {
                            local: local.to_string(),
                            timezone: timezone.to_string(),
                        });
                    }
                };
                Ok(Some(resolved.with_timezone(&Utc)))
            }
        }
    }
}

/// One phishing-simulation training campaign definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    /// Unique schedule identifier.
    pub id: Uuid,
    /// Human-readable name, used in campaign labels.
    pub name: String,
    /// Target groups; members are resolved at expansion time.
    pub group_ids: Vec<Uuid>,
    /// Directly targeted users.
    pub user_ids: Vec<Uuid>,
    /// Ordered course sequence. Never empty for a valid schedule.
    pub course_ids: Vec<Uuid>,
    /// Kind of follow-up campaign.
    pub kind: CampaignKind,
    /// Launch policy.
    pub policy: LaunchPolicy,
    /// Current status.
    pub status: ScheduleStatus,
    /// Flipped once by the starter sweep; not re-selected afterwards.
    pub started: bool,
    /// First-window launch instant, normalized to UTC. Set at expansion.
    pub starts_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Timezone course windows are computed in. UTC for immediate launches.
    #[must_use]
    pub fn timezone(&self) -> Tz {
        match &self.policy {
            LaunchPolicy::Immediate => Tz::UTC,
            LaunchPolicy::Scheduled { timezone, .. } => *timezone,
        }
    }

    /// Validate the definition as of `now`.
    ///
    /// Checks that the course list and audience are non-empty, and that a
    /// scheduled launch moment lies strictly in the future.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ExpansionError> {
        if self.course_ids.is_empty() {
            return Err(ExpansionError::NoCourses);
        }
        if self.group_ids.is_empty() && self.user_ids.is_empty() {
            return Err(ExpansionError::NoAudience);
        }
        if let Some(launch_at) = self.policy.trigger_at()? {
            if launch_at <= now {
                return Err(ExpansionError::LaunchNotInFuture { launch_at, now });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_schedule(policy: LaunchPolicy) -> Schedule {
        let now = Utc::now();
        Schedule {
            id: Uuid::new_v4(),
            name: "Q3 awareness".to_string(),
            group_ids: vec![Uuid::new_v4()],
            user_ids: vec![],
            course_ids: vec![Uuid::new_v4()],
            kind: CampaignKind::PhishingAwareness,
            policy,
            status: ScheduleStatus::Draft,
            started: false,
            starts_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn immediate_schedule_validates() {
        let schedule = base_schedule(LaunchPolicy::Immediate);
        assert!(schedule.validate(Utc::now()).is_ok());
    }

    #[test]
    fn empty_course_list_rejected() {
        let mut schedule = base_schedule(LaunchPolicy::Immediate);
        schedule.course_ids.clear();
        assert!(matches!(
            schedule.validate(Utc::now()),
            Err(ExpansionError::NoCourses)
        ));
    }

    #[test]
    fn empty_audience_rejected() {
        let mut schedule = base_schedule(LaunchPolicy::Immediate);
        schedule.group_ids.clear();
        schedule.user_ids.clear();
        assert!(matches!(
            schedule.validate(Utc::now()),
            Err(ExpansionError::NoAudience)
        ));
    }

    #[test]
    fn past_scheduled_launch_rejected() {
        let schedule = base_schedule(LaunchPolicy::Scheduled {
            date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            timezone: chrono_tz::Europe::Berlin,
        });
        assert!(matches!(
            schedule.validate(Utc::now()),
            Err(ExpansionError::LaunchNotInFuture { .. })
        ));
    }

    #[test]
    fn future_scheduled_launch_accepted() {
        let now = Utc
            .with_ymd_and_hms(2026, 8, 1, 12, 0, 0)
            .single()
            .unwrap();
        let schedule = base_schedule(LaunchPolicy::Scheduled {
            date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            timezone: chrono_tz::America::New_York,
        });
        assert!(schedule.validate(now).is_ok());
    }

    #[test]
    fn trigger_normalizes_to_utc() {
        let policy = LaunchPolicy::Scheduled {
            date: NaiveDate::from_ymd_opt(2026, 9, 1).unwrap(),
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            timezone: chrono_tz::America::New_York,
        };
        // 09:00 EDT is 13:00 UTC.
        let trigger = policy.trigger_at().unwrap().unwrap();
        assert_eq!(
            trigger,
            Utc.with_ymd_and_hms(2026, 9, 1, 13, 0, 0).single().unwrap()
        );
    }

    #[test]
    fn skipped_dst_time_rejected() {
        // 02:30 does not exist on the US spring-forward day.
        let policy = LaunchPolicy::Scheduled {
            date: NaiveDate::from_ymd_opt(2026, 3, 8).unwrap(),
            time: NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            timezone: chrono_tz::America::New_York,
        };
        assert!(matches!(
            policy.trigger_at(),
            Err(ExpansionError::NonexistentLocalTime { .. })
        ));
    }

    #[test]
    fn campaign_kind_round_trips() {
        use std::str::FromStr;
        assert_eq!(
            CampaignKind::from_str("phishing_awareness").unwrap(),
            CampaignKind::PhishingAwareness
        );
        assert_eq!(
            CampaignKind::from_str("advanced-training").unwrap(),
            CampaignKind::AdvancedTraining
        );
        assert!(CampaignKind::from_str("unknown").is_err());
    }
}
