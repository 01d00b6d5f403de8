//! mediagrab - entry point
//!
//! Serves `POST /download` plus health endpoints, runs jobs in the background
//! and sweeps expired local artifacts on a schedule.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mediagrab::cli::CliOptions;
use mediagrab::config::Config;
use mediagrab::jobs::{JobSupervisor, start_scheduler};
use mediagrab::{AppState, build_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = CliOptions::from_args();
    let mut config = Config::from_env()?;
    cli.apply(&mut config);

    let (json, pretty) = if config.pretty_logs {
        (None, Some(tracing_subscriber::fmt::layer().pretty()))
    } else {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediagrab=debug,tower_http=info".into()),
        )
        .with(json)
        .with(pretty)
        .init();

    tracing::info!("Starting mediagrab");

    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .with_context(|| format!("Failed to create temp dir {}", config.temp_dir.display()))?;

    let supervisor = JobSupervisor::from_config(&config)?;

    if cli.check {
        if !supervisor.fetcher().is_available().await {
            anyhow::bail!("Fetch tool '{}' is not available", config.fetch.tool_path);
        }
        tracing::info!(tool = %config.fetch.tool_path, "Fetch tool is available");
        return Ok(());
    }

    if supervisor.is_store_configured() {
        tracing::info!("Object store configured; large artifacts will be promoted");
    } else {
        tracing::warn!(
            threshold_bytes = config.promote_threshold_bytes,
            "No object store configured; artifacts above the threshold will fail"
        );
    }

    let _scheduler = start_scheduler(&config, supervisor.janitor().clone()).await?;

    let config = Arc::new(config);
    let addr = SocketAddr::from((config.host, config.port));
    let app = build_app(AppState {
        config: config.clone(),
        supervisor,
    });

    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
