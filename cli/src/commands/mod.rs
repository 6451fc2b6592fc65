pub mod config;
pub mod connect;
pub mod history;
pub mod query;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "semq",
    author,
    version,
    about = "semq - send natural-language queries to a streaming semantic service",
    long_about = "Signs a connection, streams the reply and keeps a local history of \
                  queries.\n\nSettings come from an optional TOML/YAML file, overlaid by SQ_* \
                  environment variables."
)]
pub struct Cli {
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "SQ_CONFIG",
        help = "Path to a TOML or YAML configuration file"
    )]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Send one query and print the aggregated response")]
    Query(query::QueryArgs),

    #[command(about = "Open a connection and report its state")]
    Connect(connect::ConnectArgs),

    #[command(subcommand, about = "List, delete, or clear past queries")]
    History(history::HistoryCommand),

    #[command(subcommand, about = "Validate or show the effective configuration")]
    Config(config::ConfigCommand)
}

/// File (if any) first, then `SQ_*` overrides. History defaults to the user
/// data directory so it survives between invocations.
pub fn load_config(path: Option<&Path>) -> Result<::config::ClientConfig> {
    let base = match path {
        Some(path) => ::config::load_from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ::config::ClientConfig::default()
    };

    let mut config =
        ::config::apply_env(base).map_err(|e| anyhow::anyhow!("invalid environment: {e}"))?;

    if config.history.directory.is_none() {
        config.history.directory = default_history_dir();
    }

    debug!(
        file = ?path,
        endpoint = %config.connection.endpoint,
        history = ?config.history.directory,
        "Configuration loaded"
    );

    Ok(config)
}

fn default_history_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("semq"))
}
