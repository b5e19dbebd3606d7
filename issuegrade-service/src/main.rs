//! issuegrade-service - issue quality scoring service
//!
//! Scores tracker issues against a weighted rubric, tracks revisions by
//! content fingerprint, runs batches as cancellable jobs and streams
//! progress over SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use issuegrade_common::events::EventBus;
use issuegrade_service::config::{CliOverrides, ServiceConfig};
use issuegrade_service::source::{JiraClient, RubricCritic};
use issuegrade_service::{AppState, Collaborators};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for issuegrade-service
#[derive(Parser, Debug)]
#[command(name = "issuegrade-service")]
#[command(about = "Issue quality scoring service")]
#[command(version)]
struct Args {
    /// TOML config file (default: ~/.config/issuegrade/config.toml)
    #[arg(short, long, env = "ISSUEGRADE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ServiceConfig::resolve(&CliOverrides {
        config_path: args.config,
        bind_address: args.bind,
        database_path: args.database,
        log_level: args.log_level,
    })
    .context("Failed to resolve configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("issuegrade_service={0},issuegrade_common={0},tower_http=info", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting issuegrade-service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    info!("Database: {}", config.database_path.display());
    let db_pool = issuegrade_service::db::init_database_pool(&config.database_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let event_bus = EventBus::with_send_timeout(config.events.channel_capacity, config.send_timeout());
    info!(capacity = config.events.channel_capacity, "Event bus initialized");

    let collaborators = match &config.jira {
        Some(jira_config) => {
            let client = Arc::new(JiraClient::new(jira_config.clone()).context("Failed to create Jira client")?);
            Collaborators {
                source: client.clone(),
                critic: Arc::new(RubricCritic),
                sink: client,
            }
        }
        None => {
            warn!("No item source configured; job submission and item analysis will fail");
            Collaborators::unconfigured()
        }
    };

    let state = AppState::new(db_pool, event_bus, collaborators, config.rubric.clone())
        .with_default_max_items(config.jobs.default_max_items);

    let recovered = state.runner.recover_stale_jobs().await?;
    if recovered > 0 {
        state
            .record_error(format!("{} job(s) interrupted by previous shutdown", recovered))
            .await;
    }

    let app = issuegrade_service::build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);
    info!("Health check: http://{}/health", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
