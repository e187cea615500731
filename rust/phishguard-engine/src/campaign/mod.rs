//! External campaign platform client.
//!
//! The launcher sweep turns an expired assignment into exactly one campaign
//! on the simulation platform. The client is the engine's only outbound
//! network dependency; it carries an explicit request timeout so one hung
//! call cannot stall a whole sweep.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::CampaignError;

/// Campaign-creation request, as the platform understands it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignRequest {
    /// Campaign label: template name + schedule name + group names.
    pub name: String,
    /// Template name on the platform.
    pub template_name: String,
    /// URL the simulated phish points at.
    pub target_url: String,
    /// Landing-page name on the platform.
    pub landing_page: String,
    /// Sending-profile name on the platform.
    pub sending_profile: String,
    /// When the platform should send, with the schedule's own offset.
    pub launch_at: DateTime<FixedOffset>,
    /// Recipient group names, as the platform knows them.
    pub recipient_groups: Vec<String>,
}

/// Creates campaigns on the external platform.
#[async_trait]
pub trait CampaignClient: Send + Sync {
    /// Create one campaign; returns the platform's campaign identifier.
    async fn create_campaign(&self, request: &CampaignRequest) -> Result<String, CampaignError>;
}

/// Campaign platform connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignPlatformConfig {
    /// Platform base URL.
    pub base_url: String,
    /// API key sent in the Authorization header.
    pub api_key: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Days between an assignment's expiry and the campaign send.
    pub launch_delay_days: u64,
}

impl Default for CampaignPlatformConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3333".to_string(),
            api_key: String::new(),
            timeout_secs: 30,
            launch_delay_days: 1,
        }
    }
}

/// HTTP client for the campaign platform's creation endpoint.
#[derive(Debug, Clone)]
pub struct HttpCampaignClient {
    config: CampaignPlatformConfig,
    client: Client,
}

impl HttpCampaignClient {
    /// Create a client with the configured request timeout.
    pub fn new(config: CampaignPlatformConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn api_url(&self) -> String {
        format!(
            "{}/api/campaigns/",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

/// Wire format of the creation endpoint.
#[derive(Debug, Serialize)]
struct CreateCampaignBody<'a> {
    name: &'a str,
    template: NamedRef<'a>,
    url: &'a str,
    page: NamedRef<'a>,
    smtp: NamedRef<'a>,
    launch_date: String,
    groups: Vec<NamedRef<'a>>,
}

#[derive(Debug, Serialize)]
struct NamedRef<'a> {
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedCampaign {
    id: i64,
}

#[async_trait]
impl CampaignClient for HttpCampaignClient {
    async fn create_campaign(&self, request: &CampaignRequest) -> Result<String, CampaignError> {
        let body = CreateCampaignBody {
            name: &request.name,
            template: NamedRef {
                name: &request.template_name,
            },
            url: &request.target_url,
            page: NamedRef {
                name: &request.landing_page,
            },
            smtp: NamedRef {
                name: &request.sending_profile,
            },
            launch_date: request.launch_at.to_rfc3339(),
            groups: request
                .recipient_groups
                .iter()
                .map(|name| NamedRef { name })
                .collect(),
        };

        let response = self
            .client
            .post(self.api_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CampaignError::Platform {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let created: CreatedCampaign =
            serde_json::from_str(&text).map_err(CampaignError::Malformed)?;
        Ok(created.id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn request_body_matches_platform_wire_format() {
        let launch_at = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 9, 2, 9, 0, 0)
            .single()
            .unwrap();
        let body = CreateCampaignBody {
            name: "Invoice lure - Q3 awareness (Finance)",
            template: NamedRef {
                name: "Invoice lure",
            },
            url: "https://landing.example.com",
            page: NamedRef { name: "login-page" },
            smtp: NamedRef { name: "default" },
            launch_date: launch_at.to_rfc3339(),
            groups: vec![NamedRef { name: "Finance" }],
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["template"]["name"], "Invoice lure");
        assert_eq!(json["smtp"]["name"], "default");
        assert_eq!(json["launch_date"], "2026-09-02T09:00:00+02:00");
        assert_eq!(json["groups"][0]["name"], "Finance");
    }

    #[test]
    fn campaign_id_parses_from_numeric_response() {
        let created: CreatedCampaign = serde_json::from_str(r#"{"id": 42}"#).unwrap();
        assert_eq!(created.id, 42);
    }
}
