//! Campaign launcher sweep.
//!
//! Finds assignments that expired during the prior full calendar day (UTC)
//! and have no campaign reference yet, builds a creation request from the
//! course's attack-simulation template and the schedule's group names, and
//! calls the external platform once per assignment. The local write happens
//! strictly after a successful response and is itself guarded, so an
//! assignment gets at most one campaign no matter how often the sweep runs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Days, Utc};

use crate::campaign::{CampaignClient, CampaignRequest};
use crate::directory::{AudienceResolver, CourseCatalog};
use crate::domain::Assignment;
use crate::store::{AssignmentRepository, ScheduleRepository, Store};

use super::{SweepProcessor, SweepReport};

/// Periodic processor that launches follow-up campaigns.
#[derive(Clone)]
pub struct CampaignLauncher {
    store: Store,
    catalog: Arc<dyn CourseCatalog>,
    audience: Arc<dyn AudienceResolver>,
    client: Arc<dyn CampaignClient>,
    launch_delay_days: u64,
}

impl std::fmt::Debug for CampaignLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignLauncher")
            .field("launch_delay_days", &self.launch_delay_days)
            .finish_non_exhaustive()
    }
}

impl CampaignLauncher {
    /// Create a launcher over the given store, directory, and client.
    pub fn new(
        store: Store,
        catalog: Arc<dyn CourseCatalog>,
        audience: Arc<dyn AudienceResolver>,
        client: Arc<dyn CampaignClient>,
        launch_delay_days: u64,
    ) -> Self {
        Self {
            store,
            catalog,
            audience,
            client,
            launch_delay_days,
        }
    }

    /// Launch the campaign for one expired assignment.
    ///
    /// Returns true when a campaign was created and recorded. A course
    /// without a template is skipped with a warning: not every course
    /// requires a follow-up test.
    async fn launch_for(&self, assignment: &Assignment, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let Some(schedule_id) = assignment.schedule_id else {
            // Filtered out by the candidate query; kept as a guard.
            return Ok(false);
        };
        let Some(expired_at) = assignment.expires_at else {
            anyhow::bail!("expired assignment {} has no expiry stamp", assignment.id);
        };

        let schedule = self
            .store
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("schedule not found: {schedule_id}"))?;

        let course = self
            .catalog
            .course(assignment.course_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("course not found: {}", assignment.course_id))?;
        let Some(template) = course.template else {
            tracing::warn!(
                assignment_id = %assignment.id,
                course_id = %assignment.course_id,
                "Course has no attack-simulation template; skipping campaign"
            );
            return Ok(false);
        };

        let group_names = self.audience.group_names(&schedule.group_ids).await?;
        let launch_at = expired_at
            .checked_add_days(Days::new(self.launch_delay_days))
            .ok_or_else(|| anyhow::anyhow!("campaign launch date overflows"))?
            .with_timezone(&schedule.timezone())
            .fixed_offset();

        let request = CampaignRequest {
            name: format!(
                "{} - {} ({})",
                template.name,
                schedule.name,
                group_names.join(", ")
            ),
            template_name: template.name,
            target_url: template.target_url,
            landing_page: template.landing_page,
            sending_profile: template.sending_profile,
            launch_at,
            recipient_groups: group_names,
        };

        // The external call happens outside any store lock or transaction;
        // the guarded local write below runs only after success.
        let campaign_id = self.client.create_campaign(&request).await?;

        if self
            .store
            .record_campaign(assignment.id, &campaign_id, now)
            .await?
        {
            tracing::info!(
                assignment_id = %assignment.id,
                campaign_id = %campaign_id,
                "Campaign launched"
            );
            Ok(true)
        } else {
            // A concurrent sweep recorded a reference first. The platform
            // call above was the loser's; flag it for operator follow-up.
            tracing::error!(
                assignment_id = %assignment.id,
                campaign_id = %campaign_id,
                "Campaign created but reference already recorded; possible duplicate on the platform"
            );
            Ok(false)
        }
    }
}

#[async_trait]
impl SweepProcessor for CampaignLauncher {
    fn name(&self) -> &'static str {
        "campaign-launcher"
    }

    async fn run_once(&self, now: DateTime<Utc>) -> anyhow::Result<SweepReport> {
        // Everything up to today's UTC day boundary: rows that expired
        // during the prior calendar day, plus older rows whose launch
        // failed on an earlier run and is being retried.
        let today = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .ok_or_else(|| anyhow::anyhow!("invalid day boundary"))?;

        let candidates = self.store.find_campaign_candidates(today).await?;
        let mut report = SweepReport::default();

        for assignment in candidates {
            report.examined += 1;
            match self.launch_for(&assignment, now).await {
                Ok(true) => report.advanced += 1,
                Ok(false) => {}
                Err(error) => {
                    // Transient: the row keeps its expired status and no
                    // reference, so the next run retries it.
                    tracing::warn!(
                        assignment_id = %assignment.id,
                        error = %error,
                        "Campaign launch failed; will retry"
                    );
                }
            }
        }

        Ok(report)
    }
}
