use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Query(args) => commands::query::run(config_path, args).await,
        Commands::Connect(args) => commands::connect::run(config_path, args).await,
        Commands::History(cmd) => commands::history::run(config_path, cmd),
        Commands::Config(cmd) => commands::config::run(config_path, cmd)
    }
}
