use anyhow::Result;
use clap::Args;
use colored::Colorize;
use semantic::{QueryOptions, QueryResponse, SemanticQueryClient};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::output;

#[derive(Args)]
pub struct QueryArgs {
    #[arg(help = "Query text")]
    pub text: String,

    #[arg(long, help = "Application id (defaults to connection.app_id)")]
    pub app_id: Option<String>,

    #[arg(long, help = "Overall timeout in milliseconds")]
    pub timeout_ms: Option<u64>,

    #[arg(long, help = "Print each fragment as it arrives")]
    pub stream: bool,

    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

pub async fn run(config_path: Option<&Path>, args: QueryArgs) -> Result<()> {
    let config = super::load_config(config_path)?;
    let client = SemanticQueryClient::from_config(&config)?;

    let validation = client.validate_config();
    if !validation.valid {
        for issue in &validation.errors {
            output::error(&issue.to_string());
        }
        anyhow::bail!("configuration is incomplete, see `semq config validate`");
    }

    let mut options = QueryOptions {
        timeout: args.timeout_ms.map(Duration::from_millis),
        ..QueryOptions::default()
    };
    if args.stream && !args.json {
        options.on_fragment = Some(Arc::new(|fragment: &semantic::StreamFragment| {
            println!("{} {}", "»".dimmed(), fragment.content);
        }));
    }

    let app_id = args.app_id.as_deref().unwrap_or("");
    debug!(query = %args.text, app_id, "Sending query");
    let outcome = client.send_query(&args.text, app_id, options).await;
    client.disconnect();
    let outcome = outcome.inspect_err(|e| warn!(kind = ?e.kind(), "Query failed"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    output::success(&format!(
        "{} in {}ms",
        outcome.status.to_string().green(),
        outcome.duration_ms
    ));

    match &outcome.response {
        Some(QueryResponse::Converted { semantic, convert }) => {
            output::subheader(&format!("Converted ({} fragments)", semantic.len()));
            println!("{}", serde_json::to_string_pretty(convert)?);
        }
        Some(QueryResponse::Raw { response }) => {
            output::subheader(&format!("Fragments ({})", response.len()));
            for (i, fragment) in response.iter().enumerate() {
                println!("  [{i}] {}", fragment.content);
            }
        }
        None => output::warn("no response payload")
    }

    Ok(())
}
