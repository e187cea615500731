//! PhishGuard Engine - Main Entry Point
//!
//! Runs the three periodic processors (schedule starter, lifecycle
//! advancer, campaign launcher) over the configured store until the
//! process receives a shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use phishguard_engine::campaign::HttpCampaignClient;
use phishguard_engine::config::EngineConfig;
use phishguard_engine::directory::{DirectorySeed, StaticDirectory};
use phishguard_engine::processors::{
    run_periodic, CampaignLauncher, LifecycleAdvancer, ScheduleStarter, SweepProcessor,
};
use phishguard_engine::store::Store;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "phishguard-engine")]
#[command(about = "PhishGuard Engine - Course delivery and campaign scheduling")]
#[command(version)]
struct Args {
    /// Log level.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,

    /// Directory seed file (groups, users, courses) for the embedded
    /// directory. Overrides the configured path.
    #[arg(long, env = "PHISHGUARD_DIRECTORY_SEED")]
    directory_seed: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(&args.log_level);

    tracing::info!("Starting PhishGuard Engine v{}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::load()?;
    tracing::info!("Configuration loaded");

    let store = build_store(&config).await?;
    tracing::info!(store = ?store, "Store initialized");

    let seed_path = args.directory_seed.or(config.directory_seed.clone());
    let directory = Arc::new(load_directory(seed_path.as_deref())?);

    let client = Arc::new(HttpCampaignClient::new(config.campaign.clone())?);

    let starter: Arc<dyn SweepProcessor> = Arc::new(ScheduleStarter::new(store.clone()));
    let advancer: Arc<dyn SweepProcessor> = Arc::new(LifecycleAdvancer::new(store.clone()));
    let launcher: Arc<dyn SweepProcessor> = Arc::new(CampaignLauncher::new(
        store,
        directory.clone(),
        directory,
        client,
        config.campaign.launch_delay_days,
    ));

    let intervals = &config.processors;
    let mut tasks = vec![
        tokio::spawn(run_periodic(
            starter,
            Duration::from_secs(intervals.starter_interval_secs),
        )),
        tokio::spawn(run_periodic(
            advancer,
            Duration::from_secs(intervals.advancer_interval_secs),
        )),
        tokio::spawn(run_periodic(
            launcher,
            Duration::from_secs(intervals.launcher_interval_secs),
        )),
    ];
    tracing::info!(
        starter_interval_secs = intervals.starter_interval_secs,
        advancer_interval_secs = intervals.advancer_interval_secs,
        launcher_interval_secs = intervals.launcher_interval_secs,
        "Processors running"
    );

    shutdown_signal().await;

    for task in tasks.drain(..) {
        task.abort();
    }
    tracing::info!("Engine shut down gracefully");
    Ok(())
}

/// Build the store named by the configuration.
async fn build_store(config: &EngineConfig) -> anyhow::Result<Store> {
    match config.database.driver.as_str() {
        "memory" => Ok(Store::in_memory()),
        "postgres" => {
            #[cfg(feature = "postgres")]
            {
                let url = config
                    .database
                    .url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("database.url is required for postgres"))?;
                let store = phishguard_engine::store::PostgresStore::connect(url).await?;
                Ok(Store::Postgres(store))
            }
            #[cfg(not(feature = "postgres"))]
            {
                anyhow::bail!(
                    "postgres driver requested but this build lacks the 'postgres' feature"
                )
            }
        }
        other => anyhow::bail!("unknown database driver: {other}"),
    }
}

/// Load the embedded directory, seeded from a JSON file when one is
/// configured.
fn load_directory(seed_path: Option<&str>) -> anyhow::Result<StaticDirectory> {
    let Some(path) = seed_path else {
        tracing::warn!("No directory seed configured; starting with an empty directory");
        return Ok(StaticDirectory::new());
    };
    let raw = std::fs::read_to_string(path)?;
    let seed: DirectorySeed = serde_json::from_str(&raw)?;
    tracing::info!(
        path,
        groups = seed.groups.len(),
        users = seed.users.len(),
        courses = seed.courses.len(),
        "Directory seeded"
    );
    Ok(StaticDirectory::from_seed(seed))
}

/// Initialize tracing/logging.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
