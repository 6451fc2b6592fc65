use anyhow::Result;
use clap::{Args, Subcommand};
use colored::Colorize;
use semantic::AuthParamBuilder;
use std::path::Path;

use crate::output;

#[derive(Subcommand)]
pub enum ConfigCommand {
    #[command(about = "Check required credentials and value ranges")]
    Validate(ValidateArgs),

    #[command(about = "Print the effective configuration (secrets masked)")]
    Show(ShowArgs)
}

#[derive(Args)]
pub struct ValidateArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

#[derive(Args)]
pub struct ShowArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

pub fn run(config_path: Option<&Path>, cmd: ConfigCommand) -> Result<()> {
    let config = super::load_config(config_path)?;

    match cmd {
        ConfigCommand::Validate(args) => {
            let credentials = AuthParamBuilder::new(config.auth.clone()).validate_config();
            let ranges = ::config::validate(&config);

            if args.json {
                let report = serde_json::json!({
                    "valid": credentials.valid && ranges.is_ok(),
                    "credentials": credentials,
                    "ranges": ranges.as_ref().err().map(ToString::to_string)
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for issue in &credentials.errors {
                    output::error(&issue.to_string());
                }
                if let Err(e) = &ranges {
                    output::error(&e.to_string());
                }
                if credentials.valid && ranges.is_ok() {
                    output::success("configuration is valid");
                }
            }

            if !credentials.valid || ranges.is_err() {
                anyhow::bail!("configuration is invalid");
            }
            Ok(())
        }
        ConfigCommand::Show(args) => {
            let mut shown = config;
            shown.auth.api_key = mask(&shown.auth.api_key);
            if let Some(conversion) = shown.conversion.as_mut() {
                conversion.authorization = mask(&conversion.authorization);
            }

            if args.json {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            } else {
                output::header("Effective configuration");
                println!("  {:<22} {}", "endpoint".bold(), shown.connection.endpoint);
                println!("  {:<22} {}", "app_id".bold(), shown.connection.app_id);
                println!("  {:<22} {}", "api_key".bold(), shown.auth.api_key);
                println!("  {:<22} {}", "auth_id".bold(), shown.auth.auth_id);
                println!("  {:<22} {}", "scene".bold(), shown.auth.scene);
                println!(
                    "  {:<22} {}ms",
                    "idle_timeout".bold(),
                    shown.aggregation.idle_timeout_ms
                );
                println!("  {:<22} {}ms", "query_timeout".bold(), shown.query.timeout_ms);
                println!(
                    "  {:<22} {}",
                    "conversion".bold(),
                    shown
                        .conversion
                        .as_ref()
                        .map_or("disabled".to_string(), |c| c.api_url.clone())
                );
                println!(
                    "  {:<22} {}",
                    "history".bold(),
                    shown
                        .history
                        .directory
                        .as_ref()
                        .map_or("memory".to_string(), |d| d.display().to_string())
                );
            }
            Ok(())
        }
    }
}

/// Keeps the last four characters of a secret.
fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{tail}", "*".repeat(count - 4))
}
