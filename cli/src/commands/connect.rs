use anyhow::Result;
use clap::Args;
use semantic::SemanticQueryClient;
use std::path::Path;
use tracing::info;

use crate::output;

#[derive(Args)]
pub struct ConnectArgs {
    #[arg(long, help = "Application id (defaults to connection.app_id)")]
    pub app_id: Option<String>,

    #[arg(long, help = "Retry with exponential backoff on failure")]
    pub retry: bool,

    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

pub async fn run(config_path: Option<&Path>, args: ConnectArgs) -> Result<()> {
    let config = super::load_config(config_path)?;
    let client = SemanticQueryClient::from_config(&config)?;
    let app_id = args.app_id.as_deref().unwrap_or("");
    info!(endpoint = %config.connection.endpoint, retry = args.retry, "Connecting");

    let result = if args.retry {
        client.connect_with_backoff(app_id).await
    } else {
        client.connect(app_id).await
    };

    if args.json {
        let report = serde_json::json!({
            "endpoint": config.connection.endpoint,
            "state": client.connection_state(),
            "description": client.connection_state_description(),
            "attempts": client.reconnect_attempts(),
            "error": result.as_ref().err().map(ToString::to_string)
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::info(&format!("endpoint: {}", config.connection.endpoint));
        match &result {
            Ok(()) => output::success(client.connection_state_description()),
            Err(e) => output::error(&format!("{} ({e})", client.connection_state_description()))
        }
    }

    client.disconnect();
    result.map_err(Into::into)
}
