//! # Cloud Apps Main Entry Point
//!
//! `serve` (the default) runs migrations, seeds the provider catalog, starts
//! the background token refresher and serves the HTTP API. `migrate` only
//! applies migrations.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use cloud_apps::{
    config::ConfigLoader,
    db,
    oauth::ProviderRegistry,
    repositories::ProviderRepository,
    seeds::seed_providers,
    server::{AppState, run_server},
    telemetry,
};

#[derive(Debug, Parser)]
#[command(name = "cloud-apps", version, about = "OAuth2 app orchestrator for cloud provider APIs")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API and run the token refresher
    Serve,
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::run_migrations(&db).await?;

    if matches!(args.command, Some(Command::Migrate)) {
        tracing::info!("Migrations applied");
        return Ok(());
    }

    let config = Arc::new(config);
    let db = Arc::new(db);

    let registry = Arc::new(ProviderRegistry::from_config(&config.provider_endpoints));
    seed_providers(&ProviderRepository::new(Arc::clone(&db)), &registry)
        .await
        .context("seeding providers")?;

    let (state, refresher) = AppState::build(Arc::clone(&config), db, registry)?;

    let shutdown = CancellationToken::new();
    let refresher_handle = config.token_refresh.enabled.then(|| {
        let token = shutdown.child_token();
        tokio::spawn(async move { refresher.run(token).await })
    });

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for shutdown signal");
        }
        tracing::info!("Shutdown requested");
        signal_token.cancel();
    });

    let served = run_server(state, shutdown.clone()).await;
    shutdown.cancel();
    if let Some(handle) = refresher_handle {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "Token refresher task ended abnormally");
        }
    }

    served
}
