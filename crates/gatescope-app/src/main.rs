//! Gatescope - discovers active gateway proxies, classifies their security
//! posture and aggregates monthly usage metrics.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use gatescope_app::run::{execute, Job, RunError};
use gatescope_app::settings::Settings;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Exit code for configuration errors.
const CONFIG_EXIT_CODE: u8 = 2;

/// Gatescope - gateway proxy catalog and usage metrics
#[derive(Parser, Debug)]
#[command(name = "gatescope", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Discover active proxies and upsert their catalog rows
    Catalog,
    /// Run the usage queries and upsert monthly metric rows
    Metrics,
    /// Catalog, then metrics
    Both,
}

impl From<Command> for Job {
    fn from(command: Command) -> Self {
        match command {
            Command::Catalog => Job::Catalog,
            Command::Metrics => Job::Metrics,
            Command::Both => Job::Both,
        }
    }
}

/// Get the logs directory path.
fn logs_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "gatescope", "gatescope").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize console logging plus a daily rolling log file.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_level = if args.debug { "debug" } else { &args.log_level };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("gatescope={},warn", log_level)));

    if let Some(log_dir) = logs_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(14)
                .filename_prefix("gatescope")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);

                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::debug!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }
    }

    // Fallback: console logging only
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::warn!("File logging unavailable, using console only");
    None
}

fn run(job: Job) -> Result<(), RunError> {
    let settings = Settings::from_env()?;
    let summary = execute(job, &settings)?;

    if let Some(rows) = summary.catalog_rows {
        println!("[catalog] upserted {} rows", rows);
    }
    if let Some(rows) = summary.metric_rows {
        println!("[metrics] upserted {} monthly rows", rows);
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard = init_logging(&args);

    tracing::info!("Starting Gatescope {:?}", args.command);

    match run(args.command.into()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(RunError::Settings(e)) => {
            tracing::error!("Configuration error: {}", e);
            eprintln!("configuration error: {e}");
            ExitCode::from(CONFIG_EXIT_CODE)
        }
        Err(e) => {
            let e = anyhow::Error::new(e);
            tracing::error!("Run failed: {:#}", e);
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
