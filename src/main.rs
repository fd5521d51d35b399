use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cqms::cli::{run_command, Cli, Commands};
use cqms::config::Config;
use cqms::db::Session;
use cqms::startup::run_startup_checks;
use cqms::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration; `config check` reports a broken file itself
    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(_) if matches!(cli.command, Some(Commands::Config(_))) => Config::default(),
        Err(e) => return Err(e),
    };
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    // Client subcommands print their own output; keep logs quiet unless asked
    let default_level = if cli.command.is_some() && cli.log_level.is_none() {
        "warn".to_string()
    } else {
        config.logging.level.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&default_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.command.is_some() {
        return run_command(&cli, &config).await;
    }

    tracing::info!("Starting cqms v{}", env!("CARGO_PKG_VERSION"));

    // Initialize database (creates the data directory if needed)
    let db = cqms::db::init(&config).await?;

    if cli.skip_checks {
        tracing::warn!("Startup self-checks skipped");
    } else {
        let report = run_startup_checks(&config, &db).await;
        if !report.is_ready() {
            anyhow::bail!("Startup checks failed: {}", report.summary());
        }
    }

    let purged = Session::purge_expired(&db, chrono::Utc::now()).await?;
    if purged > 0 {
        tracing::info!(count = purged, "Removed expired sessions");
    }

    let state = Arc::new(AppState::new(config.clone(), db));
    let app = cqms::api::create_router(state);

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
