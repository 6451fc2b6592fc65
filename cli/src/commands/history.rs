use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use colored::Colorize;
use semantic::{FileStore, HistoryRecord, HistoryStore, MemoryStore, QueryStatus};
use std::path::Path;
use std::sync::Arc;

use crate::output;

#[derive(Subcommand)]
pub enum HistoryCommand {
    #[command(about = "List recorded queries, newest first")]
    List(ListArgs),

    #[command(about = "Delete one entry by its index in `list`")]
    Delete(DeleteArgs),

    #[command(about = "Remove all entries")]
    Clear
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

#[derive(Args)]
pub struct DeleteArgs {
    #[arg(help = "Zero-based index")]
    pub index: usize
}

pub fn run(config_path: Option<&Path>, cmd: HistoryCommand) -> Result<()> {
    let config = super::load_config(config_path)?;
    let history = match &config.history.directory {
        Some(directory) => HistoryStore::new(Arc::new(FileStore::new(directory))),
        None => {
            output::warn("no history directory available, history is empty");
            HistoryStore::new(Arc::new(MemoryStore::new()))
        }
    };

    match cmd {
        HistoryCommand::List(args) => list(&history, args.json),
        HistoryCommand::Delete(args) => {
            let before = history.list()?.len();
            history.delete(args.index)?;
            if args.index < before {
                output::success(&format!("deleted entry {}", args.index));
            } else {
                output::warn(&format!("no entry at index {}", args.index));
            }
            Ok(())
        }
        HistoryCommand::Clear => {
            history.clear()?;
            output::success("history cleared");
            Ok(())
        }
    }
}

fn list(history: &HistoryStore, json: bool) -> Result<()> {
    let records = history.list()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        output::info("no queries recorded yet");
        return Ok(());
    }

    output::header("Query history");
    for (i, record) in records.iter().enumerate() {
        println!("{}", format_record(i, record));
    }
    Ok(())
}

fn format_record(index: usize, record: &HistoryRecord) -> String {
    let when = DateTime::<Utc>::from_timestamp_millis(record.timestamp)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| record.timestamp.to_string());

    let status = match record.status {
        QueryStatus::Success => "success".green(),
        QueryStatus::Error => "error".red(),
        QueryStatus::Timeout => "timeout".yellow()
    };

    let mut line = format!(
        "[{index:>2}] {when}  {status:<7}  {:>6}ms  {}",
        record.duration, record.query
    );
    if let Some(message) = &record.message {
        line.push_str(&format!("\n      {}", message.dimmed()));
    }
    line
}
