//! tokenguard - Manage IP restrictions for API authentication tokens
//!
//! Restrictions are stored in `restrictions.json` in the data directory.
//! Operations that widen or remove access ask for confirmation unless
//! `--force` is given.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tokenguard_cli::{App, Cli, Status, StdinConfirm};
use tokenguard_core::{JsonFileStore, SettingsManager};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<Status> {
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => JsonFileStore::default_dir().context("Failed to determine data directory")?,
    };

    // The log filter comes from the settings, so an unreadable settings file
    // is reported here rather than through tracing
    let settings = SettingsManager::load(&data_dir)
        .with_context(|| format!("Failed to read settings from {}", data_dir.join("settings.json").display()))?;

    // Logs go to stderr so stdout only carries command output
    let log_filter = settings.get().log_filter.clone();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut app = App::open(&data_dir, settings)
        .with_context(|| format!("Failed to open restriction store in {}", data_dir.display()))?;

    let mut stdout = std::io::stdout();
    match app.run(cli.command, &StdinConfirm, &mut stdout).await {
        Ok(status) => Ok(status),
        Err(e) if e.is_user_error() => {
            eprintln!("Error: {}", e);
            Ok(Status::Failed)
        }
        Err(e) => Err(e).context("Command failed"),
    }
}
