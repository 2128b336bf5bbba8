//! `run` command implementation.

use std::time::Duration;

use anyhow::{Context, Result};
use config_loader::ConfigLoader;
use contracts::StreamingBlueprint;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::{ensure_config_exists, CliError};
use crate::runner::{Runner, RunnerConfig};

/// Execute the `run` command
pub async fn run_feeds(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    ensure_config_exists(&args.config)?;

    let mut blueprint = ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    apply_overrides(&mut blueprint, args)?;

    info!(
        feeds = blueprint.feeds.len(),
        channels = blueprint.channels.len(),
        enable_live_feed = blueprint.streaming.enable_live_feed,
        enable_channel = blueprint.streaming.enable_channel,
        fallback_enabled = blueprint.streaming.fallback_enabled,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&blueprint);
        return Ok(());
    }

    let runner = Runner::new(RunnerConfig {
        blueprint,
        duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
        max_points: (args.max_points > 0).then_some(args.max_points),
        metrics_port: (args.metrics_port > 0).then_some(args.metrics_port),
        sender_id: args.sender_id.clone(),
    });

    info!("Connecting feeds and channels...");

    let stats = runner
        .run(shutdown_signal())
        .await
        .context("Feed runner failed")?;

    info!(
        points = stats.summary.total_points,
        live_points = stats.summary.live_points,
        synthetic_points = stats.summary.synthetic_points,
        channel_messages = stats.channel_messages,
        duration_secs = stats.duration.as_secs_f64(),
        "Run finished"
    );
    stats.print_summary();

    Ok(())
}

/// Apply CLI/env overrides on top of the file, then re-validate
fn apply_overrides(blueprint: &mut StreamingBlueprint, args: &RunArgs) -> Result<(), CliError> {
    if let Some(enable) = args.enable_live {
        info!(enable, "Overriding streaming.enable_live_feed");
        blueprint.streaming.enable_live_feed = enable;
    }
    if let Some(enable) = args.enable_channel {
        info!(enable, "Overriding streaming.enable_channel");
        blueprint.streaming.enable_channel = enable;
    }
    if let Some(url) = &args.feed_base_url {
        info!(url = %url, "Overriding upstream.feed_base_url");
        blueprint.upstream.feed_base_url = url.clone();
    }
    if let Some(url) = &args.channel_url {
        info!(url = %url, "Overriding upstream.channel_url");
        blueprint.upstream.channel_url = url.clone();
    }
    if let Some(token) = &args.auth_token {
        blueprint.upstream.auth_token = Some(token.clone());
    }

    if !cfg!(feature = "live")
        && (blueprint.streaming.enable_live_feed || blueprint.streaming.enable_channel)
    {
        warn!("Built without live transports: feeds fall back and channels stay offline");
    }

    ConfigLoader::validate(blueprint).map_err(|e| CliError::invalid_override(e.to_string()))
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(blueprint: &StreamingBlueprint) {
    let streaming = &blueprint.streaming;
    println!("\n=== Configuration Summary ===\n");
    println!("Upstream:");
    println!("  Feeds:    {}", or_unset(&blueprint.upstream.feed_base_url));
    println!("  Channels: {}", or_unset(&blueprint.upstream.channel_url));
    println!(
        "  Auth:     {}",
        if blueprint.upstream.auth_token.is_some() {
            "bearer token"
        } else {
            "none"
        }
    );

    println!("\nFeeds ({}):", blueprint.feeds.len());
    for feed in &blueprint.feeds {
        println!("  - {} {} ({:?})", feed.name, feed.endpoint_path, feed.adapter);
    }

    if !blueprint.channels.is_empty() {
        println!("\nChannels ({}):", blueprint.channels.len());
        for channel in &blueprint.channels {
            match &channel.scope_id {
                Some(scope) => println!("  - {} (consultation {})", channel.name, scope),
                None => println!("  - {}", channel.name),
            }
        }
    }

    println!("\nStreaming:");
    println!("  Live feeds: {}", streaming.enable_live_feed);
    println!("  Channels: {}", streaming.enable_channel);
    println!("  Fallback: {}", streaming.fallback_enabled);
    println!("  Cache TTL: {} min", streaming.cache_ttl_minutes);
    println!("  Max reconnect attempts: {}", streaming.max_reconnect_attempts);

    println!();
}

fn or_unset(value: &str) -> &str {
    if value.is_empty() {
        "(unset)"
    } else {
        value
    }
}
