//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::StreamingBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    feed_count: usize,
    channel_count: usize,
    enable_live_feed: bool,
    enable_channel: bool,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", blueprint.version),
                    feed_count: blueprint.feeds.len(),
                    channel_count: blueprint.channels.len(),
                    enable_live_feed: blueprint.streaming.enable_live_feed,
                    enable_channel: blueprint.streaming.enable_channel,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &StreamingBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();
    let streaming = &blueprint.streaming;

    if blueprint.feeds.is_empty() && blueprint.channels.is_empty() {
        warnings.push("No feeds or channels declared - nothing to run".to_string());
    }

    if !streaming.enable_live_feed && !blueprint.feeds.is_empty() {
        if streaming.fallback_enabled {
            warnings.push("enable_live_feed = false - feeds serve fallback data only".to_string());
        } else {
            warnings.push(
                "enable_live_feed = false and fallback disabled - feeds never produce data"
                    .to_string(),
            );
        }
    }

    if !streaming.enable_channel && !blueprint.channels.is_empty() {
        warnings.push("enable_channel = false - declared channels stay disconnected".to_string());
    }

    if blueprint.upstream.auth_token.is_none()
        && (streaming.enable_live_feed || streaming.enable_channel)
    {
        warnings.push("upstream.auth_token not set - requests are anonymous".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Feeds: {}", summary.feed_count);
            println!("  Channels: {}", summary.channel_count);
            println!("  Live feeds: {}", summary.enable_live_feed);
            println!("  Channels enabled: {}", summary.enable_channel);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
