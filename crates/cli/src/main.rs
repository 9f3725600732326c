//! CLI entry point for archive265
//!
//! Exit status: 0 when the run completed (even with per-file failures),
//! 1 on configuration or setup errors, 2 with `--strict` when any file
//! failed, 130 when interrupted.

mod cli;

use archive265::{Config, Pipeline, RunSummary};
use clap::Parser;
use cli::Cli;
use std::path::Path;
use std::process::ExitCode;
use tracing::{error, info, warn};

const EXIT_SETUP: u8 = 1;
const EXIT_FILES_FAILED: u8 = 2;
const EXIT_INTERRUPTED: i32 = 130;

fn init_logging(verbose: bool) {
    // RUST_LOG wins over --verbose
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if verbose {
            "archive265=debug,archive265_cli=debug".to_string()
        } else {
            "archive265=info,archive265_cli=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config, archive265::config::ConfigError> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => {
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };
    cli.resolve(config)
}

fn write_summary(path: &Path, summary: &RunSummary) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, json)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_SETUP);
        }
    };

    let mut pipeline = match Pipeline::from_config(&config, cli.dry_run) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_SETUP);
        }
    };

    // The pipeline blocks on file I/O and child processes
    let run = tokio::task::spawn_blocking(move || pipeline.run());

    let joined = tokio::select! {
        joined = run => joined,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; the archive tree is resumable, rerun to continue");
            std::process::exit(EXIT_INTERRUPTED);
        }
    };

    let summary = match joined {
        Ok(Ok(summary)) => summary,
        Ok(Err(e)) => {
            error!("{}", e);
            return ExitCode::from(EXIT_SETUP);
        }
        Err(e) => {
            error!("Pipeline task failed: {}", e);
            return ExitCode::from(EXIT_SETUP);
        }
    };

    if let Some(path) = &cli.summary_json {
        match write_summary(path, &summary) {
            Ok(()) => info!("Summary written to {}", path.display()),
            Err(e) => warn!("Failed to write summary to {}: {}", path.display(), e),
        }
    }

    if cli.strict && !summary.is_clean() {
        warn!("{} file(s) not archived", summary.failures.len());
        return ExitCode::from(EXIT_FILES_FAILED);
    }

    ExitCode::SUCCESS
}
