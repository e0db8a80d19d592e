//! Riser server
//!
//! Accepts deployment requests, tracks revisions and traffic in Postgres and
//! publishes the resulting desired state to a git state repository.

use std::sync::Arc;

use anyhow::Result;
use riser_server::{
    api, config,
    db::Database,
    deployment::{DeploymentService, ManifestRenderer},
    state::AppState,
};
use riser_state_repo::{GitCommitter, GitRepo};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to RISER_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting riser server");
    info!(
        listen_addr = %config.listen_addr,
        state_repo = %config.state_repo.git.url,
        branch = %config.state_repo.git.branch,
        "Configuration loaded"
    );

    let db = match Database::connect(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let committer = GitCommitter::new(
        GitRepo::new(config.state_repo.git.clone()),
        config.state_repo.step_timeout,
    );
    let deployments = DeploymentService::new(
        Arc::new(db.reservation_store()),
        Arc::new(db.deployment_store()),
        Arc::new(ManifestRenderer::new()),
        Arc::new(committer),
    );

    let app = api::create_router(AppState::new(deployments));

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        })
        .await?;

    info!("Riser server shutdown complete");
    Ok(())
}
