//! Configuration loading for the engine.
//!
//! Settings are layered: built-in defaults, an optional `phishguard.yaml`
//! file, then environment variables prefixed `PHISHGUARD_` (double
//! underscore as the section separator, e.g.
//! `PHISHGUARD_CAMPAIGN__BASE_URL`).

use serde::{Deserialize, Serialize};

use crate::campaign::CampaignPlatformConfig;
use crate::sequencer::SequencerConfig;

/// Sweep intervals, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Schedule starter interval.
    pub starter_interval_secs: u64,
    /// Lifecycle advancer interval. Shorter than the starter's.
    pub advancer_interval_secs: u64,
    /// Campaign launcher interval. Daily by default.
    pub launcher_interval_secs: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            starter_interval_secs: 300,
            advancer_interval_secs: 60,
            launcher_interval_secs: 86_400,
        }
    }
}

/// Store backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// `memory` or `postgres`.
    pub driver: String,
    /// Connection URL for the Postgres driver.
    pub url: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            driver: "memory".to_string(),
            url: None,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sweep intervals.
    #[serde(default)]
    pub processors: ProcessorConfig,
    /// Course window policy constants.
    #[serde(default)]
    pub sequencer: SequencerConfig,
    /// Campaign platform connection.
    #[serde(default)]
    pub campaign: CampaignPlatformConfig,
    /// Store backend.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Optional directory seed file (groups, users, courses) for embedded
    /// deployments.
    #[serde(default)]
    pub directory_seed: Option<String>,
}

impl EngineConfig {
    /// Load configuration from defaults, file, and environment.
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::load_unchecked()?;
        config.validate()?;
        Ok(config)
    }

    /// Load without validation.
    pub fn load_unchecked() -> anyhow::Result<Self> {
        // Load .env file if present
        let _ = dotenvy::dotenv();

        let defaults = Self::default();
        let config = config::Config::builder()
            .set_default(
                "processors.starter_interval_secs",
                defaults.processors.starter_interval_secs,
            )?
            .set_default(
                "processors.advancer_interval_secs",
                defaults.processors.advancer_interval_secs,
            )?
            .set_default(
                "processors.launcher_interval_secs",
                defaults.processors.launcher_interval_secs,
            )?
            .set_default("sequencer.window_days", defaults.sequencer.window_days)?
            .set_default("sequencer.gap_days", defaults.sequencer.gap_days)?
            .set_default("campaign.base_url", defaults.campaign.base_url.clone())?
            .set_default("campaign.api_key", defaults.campaign.api_key.clone())?
            .set_default("campaign.timeout_secs", defaults.campaign.timeout_secs)?
            .set_default(
                "campaign.launch_delay_days",
                defaults.campaign.launch_delay_days,
            )?
            .set_default("database.driver", defaults.database.driver.clone())?
            .add_source(config::File::with_name("phishguard").required(false))
            .add_source(
                config::Environment::with_prefix("PHISHGUARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Reject settings the processors cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sequencer.window_days == 0 {
            anyhow::bail!("sequencer.window_days must be at least 1");
        }
        if self.processors.advancer_interval_secs == 0
            || self.processors.starter_interval_secs == 0
            || self.processors.launcher_interval_secs == 0
        {
            anyhow::bail!("processor intervals must be non-zero");
        }
        if self.campaign.timeout_secs == 0 {
            anyhow::bail!("campaign.timeout_secs must be non-zero");
        }
        match self.database.driver.as_str() {
            "memory" => {}
            "postgres" => {
                if self.database.url.is_none() {
                    anyhow::bail!("database.url is required for the postgres driver");
                }
            }
            other => anyhow::bail!("unknown database driver: {other}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sequencer.window_days, 21);
        assert_eq!(config.processors.launcher_interval_secs, 86_400);
    }

    #[test]
    fn zero_window_rejected() {
        let mut config = EngineConfig::default();
        config.sequencer.window_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn postgres_driver_requires_url() {
        let mut config = EngineConfig::default();
        config.database.driver = "postgres".to_string();
        assert!(config.validate().is_err());
        config.database.url = Some("postgres://localhost/phishguard".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_driver_rejected() {
        let mut config = EngineConfig::default();
        config.database.driver = "sqlite".to_string();
        assert!(config.validate().is_err());
    }
}
