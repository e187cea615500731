//! Core domain models: schedules, assignments, and the lifecycle machine.

pub mod assignment;
pub mod schedule;

pub use assignment::{Assignment, AssignmentStatus};
pub use schedule::{CampaignKind, LaunchPolicy, Schedule, ScheduleStatus};
