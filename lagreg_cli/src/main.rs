mod cli;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use lagreg_rs::{DirectionPipeline, RunReport};
use tracing_appender::non_blocking::NonBlocking;
use tracing_subscriber::{EnvFilter, prelude::*};

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Stdout carries only the result block.
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let file_layer = log_file
        .map(open_log_writer)
        .transpose()?
        .map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize tracing")
}

/// Append-mode non-blocking writer for `--log-file`.
fn open_log_writer(path: &Path) -> Result<NonBlocking> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);
    // The guard flushes on drop and must outlive every log call.
    let _guard = Box::leak(Box::new(guard));
    Ok(writer)
}

fn log_invocation(log_file: Option<&PathBuf>) {
    let cwd = std::env::current_dir().ok();
    let argv: Vec<String> = std::env::args_os()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    tracing::info!("==================== new lagreg run ====================");
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        cwd = ?cwd,
        log_file = ?log_file,
        argv = ?argv,
        "lagreg invoked"
    );
    if argv.len() >= 2 {
        tracing::info!(
            "cargo_repro_command=cargo run --release -p lagreg_cli -- {}",
            argv[1..].join(" ")
        );
    }
}

fn write_summary(path: &Path, report: &RunReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!(path = %path.display(), "Wrote run summary");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Train(args) => {
            let log_file = args.log_file.clone();
            let summary_json = args.summary_json.clone();

            init_tracing(log_file.as_deref())?;
            log_invocation(log_file.as_ref());

            let config = args.into_config()?;
            let report = DirectionPipeline::new(config).run()?;

            println!("{report}");
            if let Some(path) = summary_json {
                write_summary(&path, &report)?;
            }
            Ok(())
        }
    }
}
