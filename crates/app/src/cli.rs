use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::watch::{
    self, DEFAULT_LOG_PATH, FileStore, LocalRescueLog, OneShotCliArgs, ScanConfig,
    TelemetryOptions, WatchCliArgs, WatchConfig,
};

/// Marine hazard scanning and rescue escalation.
#[derive(Debug, Parser)]
#[command(name = "marine-watch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the watch engine and its HTTP surface.
    Watch(WatchCliArgs),
    /// Scan a bounding box once and print hazard flags as JSON.
    Scan(OneShotCliArgs),
    /// Print the local rescue log, most recent first.
    Log {
        #[arg(long = "path", value_name = "PATH", default_value = DEFAULT_LOG_PATH)]
        path: PathBuf,
    },
}

pub fn handle_command(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Watch(args) => watch::run(WatchConfig::try_from(args)?),
        Command::Scan(args) => {
            let config = ScanConfig::try_from(args)?;
            let _telemetry_guard = watch::install_subscriber(&TelemetryOptions::default());
            watch::current_thread_runtime()?.block_on(watch::scan_once(config))
        }
        Command::Log { path } => print_log(path),
    }
}

fn print_log(path: PathBuf) -> Result<()> {
    let log = watch::current_thread_runtime()?
        .block_on(LocalRescueLog::load(FileStore::new(path.clone())))
        .with_context(|| format!("Failed to read rescue log {}", path.display()))?;
    let json =
        serde_json::to_string_pretty(log.entries()).context("Failed to encode rescue log")?;
    println!("{json}");
    Ok(())
}
