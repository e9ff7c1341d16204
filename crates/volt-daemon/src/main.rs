//! Volthaus Daemon - background maintenance for the chore economy.
//!
//! The daemon:
//! - compiles the access rules once at startup (malformed rules abort here)
//! - hosts the in-memory reference store, optionally seeded with fixtures
//! - runs the weekly replenishment and decay schedules until ctrl-c

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use volt_policy::AccessPolicies;
use volt_scheduler::Scheduler;
use volt_service::VoltService;
use volt_storage::memory::InMemoryVoltStore;
use volt_storage::VoltStore;

mod config;
mod error;
mod seed;

use config::{DaemonConfig, StorageConfig};
use error::{DaemonError, DaemonResult};

/// Volthaus Daemon CLI
#[derive(Parser)]
#[command(name = "volthausd")]
#[command(about = "Volthaus daemon - chore economy maintenance service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VOLT_CONFIG")]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "VOLT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "VOLT_LOG_JSON")]
    json: bool,

    /// Seed the stock mission and bazaar fixtures on startup
    #[arg(long, env = "VOLT_SEED_FIXTURES")]
    seed: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Load configuration
    let config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    // Access rules are configuration; they fail here or never.
    let policies = AccessPolicies::load(&config.policies)?;

    let store: Arc<dyn VoltStore> = match config.storage {
        StorageConfig::Memory => Arc::new(InMemoryVoltStore::new()),
    };

    if cli.seed || config.seed.fixtures {
        seed::seed_fixtures(store.as_ref()).await?;
    }

    let service = VoltService::new(store, policies);
    let (scheduler, triggers) =
        Scheduler::new(config.scheduler, service.bazaar(), service.ledger());

    let scheduler_task = tokio::spawn(scheduler.clone().start(triggers));
    tracing::info!("volthausd running, press ctrl-c to stop");

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }

    tracing::info!("shutting down");
    scheduler.stop().await;
    scheduler_task.abort();

    Ok(())
}
