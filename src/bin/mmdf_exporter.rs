//! gpfs_mmdf_exporter - one-shot capacity export for the textfile collector.
//!
//! Intended to run from cron on a single collection node: capacity numbers
//! are cluster-wide, so running it on every node would hammer the cluster
//! managers with redundant mmdf calls. A flock on the lockfile stops
//! overlapping runs when mmdf is slower than the cron interval.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, Level};

use gpfs_exporter::batch;
use gpfs_exporter::cli::LogLevel;
use gpfs_exporter::collectors::Exporter;
use gpfs_exporter::config::Config;
use gpfs_exporter::runner::SudoRunner;

#[derive(Parser, Debug)]
#[command(
    name = "gpfs_mmdf_exporter",
    about = "Writes GPFS capacity metrics to a Prometheus textfile collector file",
    author = "Michael Moll <exporter@herakles.now> - Herakles",
    version
)]
struct Args {
    /// Output file for the node-exporter textfile collector
    #[arg(long)]
    output: PathBuf,

    /// Lockfile preventing overlapping runs
    #[arg(long, default_value = "/tmp/gpfs_mmdf_exporter.lock")]
    lockfile: PathBuf,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Privilege escalation command prefixed to every mm* invocation (empty disables)
    #[arg(long = "exporter.sudo-command", default_value = "sudo")]
    sudo_command: String,

    /// Timeout (seconds) for each mmdf invocation
    #[arg(long = "collector.mmdf.timeout", default_value_t = 60)]
    timeout: u64,

    /// Comma-separated filesystems to report (default: enumerate with mmlsfs)
    #[arg(long = "collector.mmdf.filesystems")]
    filesystems: Option<String>,
}

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

#[tokio::main]
async fn main() {
    let args = Args::parse();
    setup_logging(&args);

    let _lock = match batch::acquire_lock(&args.lockfile) {
        Ok(lock) => lock,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let mut config = Config::default();
    config.enable_only(&["mmdf"]);
    config.sudo_command = args.sudo_command.clone();
    config.mmdf_timeout = Duration::from_secs(args.timeout);
    config.mmdf_filesystems = args
        .filesystems
        .as_deref()
        .map(|list| list.split(',').map(|fs| fs.trim().to_string()).collect());

    let runner = Arc::new(SudoRunner::new(config.sudo_command.clone()));
    let exporter = Exporter::from_config(&config, runner);

    match batch::run(&exporter, &args.output).await {
        Ok(failures) if failures.is_empty() => {}
        Ok(failures) => {
            error!("Collection failed for: {}", failures.join(", "));
            std::process::exit(1);
        }
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
