//! gpfs_exporter - Prometheus exporter for GPFS (IBM Spectrum Scale).
//!
//! Main entry point: parses the CLI, builds the enabled collector set and
//! serves `/metrics` until SIGINT or SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use tokio::{net::TcpListener, signal};
use tracing::{info, Level};

use gpfs_exporter::cli::{Args, LogLevel};
use gpfs_exporter::collectors::Exporter;
use gpfs_exporter::config::Config;
use gpfs_exporter::handlers::{metrics_handler, root_handler, AppState};
use gpfs_exporter::runner::SudoRunner;

/// Initializes the tracing subscriber with the configured log level.
fn setup_logging(args: &Args) {
    let log_level = match args.log_level {
        LogLevel::Off => Level::ERROR,
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install SIGINT handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully..."),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully..."),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args);
    info!(
        "Starting gpfs_exporter {} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("VERGEN_BUILD_TIMESTAMP")
    );

    let config = Config::from_args(&args)?;
    let runner = Arc::new(SudoRunner::new(config.sudo_command.clone()));
    let exporter = Exporter::from_config(&config, runner);
    info!("Enabled collectors: {}", exporter.collector_names().join(", "));

    let state = Arc::new(AppState {
        exporter,
        include_exporter_metrics: !config.disable_exporter_metrics,
    });

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let listener = TcpListener::bind(config.listen_address)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_address))?;
    info!("Listening on {}", config.listen_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shut down");
    Ok(())
}
