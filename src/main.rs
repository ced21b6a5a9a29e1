use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vuln_harvester::config::{Args, HarvesterConfig};
use vuln_harvester::github::GithubClient;
use vuln_harvester::harvest::IngestPipeline;
use vuln_harvester::server::{self, AppState};
use vuln_harvester::store::MySqlVulnerabilityStore;
use vuln_harvester::{ContentFetcher, IngestExecutor, VulnerabilityStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file_loaded = dotenvy::dotenv().is_ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if env_file_loaded {
        info!("loaded .env file");
    }

    let config = HarvesterConfig::try_from(Args::parse()).context("invalid configuration")?;

    let store = MySqlVulnerabilityStore::connect(&config.database_url, config.db_max_connections)
        .await
        .context("database connection failed")?;
    store
        .ensure_schema()
        .await
        .context("failed to create vulnerabilities table")?;

    let github = GithubClient::new(&config.github_api, config.github_token.as_deref())
        .context("failed to build GitHub client")?;

    let fetcher: Arc<dyn ContentFetcher> = Arc::new(github.content_fetcher());
    let store: Arc<dyn VulnerabilityStore> = Arc::new(store);
    let pipeline = IngestPipeline::new(fetcher, store).with_timeout(config.stage_timeout);
    let shutdown = CancellationToken::new();
    let executor =
        IngestExecutor::new(pipeline, config.max_workers).with_cancellation(shutdown.clone());

    let app = server::router(AppState::new(executor, Arc::new(github)));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(
        addr = %config.bind_addr,
        max_workers = config.max_workers,
        "Server starting"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on ctrl-c after cancelling in-flight ingestion batches.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, cancelling ingestion");
    shutdown.cancel();
}
