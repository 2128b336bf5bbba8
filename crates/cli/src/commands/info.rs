//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{consultation_channel_name, StreamingBlueprint, StreamingConfig};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::ensure_config_exists;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    upstream: UpstreamInfo,
    feeds: Vec<FeedInfo>,
    channels: Vec<ChannelInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    streaming: Option<StreamingConfig>,
}

#[derive(Serialize)]
struct UpstreamInfo {
    feed_base_url: String,
    channel_url: String,
    authenticated: bool,
}

#[derive(Serialize)]
struct FeedInfo {
    name: String,
    endpoint_path: String,
    adapter: String,
}

#[derive(Serialize)]
struct ChannelInfo {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    consultation_id: Option<String>,
    /// Name differs from the conventional `consultation-{id}`
    custom_name: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    ensure_config_exists(&args.config)?;

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &StreamingBlueprint, args: &InfoArgs) -> ConfigInfo {
    let feeds = blueprint
        .feeds
        .iter()
        .map(|f| FeedInfo {
            name: f.name.clone(),
            endpoint_path: f.endpoint_path.clone(),
            adapter: format!("{:?}", f.adapter),
        })
        .collect();

    let channels = blueprint
        .channels
        .iter()
        .map(|c| ChannelInfo {
            name: c.name.clone(),
            consultation_id: c.scope_id.clone(),
            custom_name: c
                .scope_id
                .as_deref()
                .is_some_and(|id| consultation_channel_name(id) != c.name),
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        upstream: UpstreamInfo {
            feed_base_url: blueprint.upstream.feed_base_url.clone(),
            channel_url: blueprint.upstream.channel_url.clone(),
            authenticated: blueprint.upstream.auth_token.is_some(),
        },
        feeds,
        channels,
        streaming: args.streaming.then(|| blueprint.streaming.clone()),
    }
}

fn print_config_info(blueprint: &StreamingBlueprint, args: &InfoArgs) {
    println!("=== Energy Feed Configuration ===\n");

    println!("Upstream");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Feed base URL: {}", blueprint.upstream.feed_base_url);
    println!("   ├─ Channel URL: {}", blueprint.upstream.channel_url);
    println!(
        "   └─ Auth: {}",
        if blueprint.upstream.auth_token.is_some() {
            "bearer token"
        } else {
            "none"
        }
    );

    println!("\nFeeds ({})", blueprint.feeds.len());
    for (i, feed) in blueprint.feeds.iter().enumerate() {
        let prefix = if i == blueprint.feeds.len() - 1 { "└─" } else { "├─" };
        println!(
            "   {} {} {} ({:?})",
            prefix, feed.name, feed.endpoint_path, feed.adapter
        );
    }

    if !blueprint.channels.is_empty() {
        println!("\nChannels ({})", blueprint.channels.len());
        for (i, channel) in blueprint.channels.iter().enumerate() {
            let prefix = if i == blueprint.channels.len() - 1 { "└─" } else { "├─" };
            match &channel.scope_id {
                Some(id) => println!("   {} {} (consultation {})", prefix, channel.name, id),
                None => println!("   {} {}", prefix, channel.name),
            }
        }
    }

    let s = &blueprint.streaming;
    println!("\nStreaming");
    println!("   ├─ Live feeds: {}", s.enable_live_feed);
    println!("   ├─ Channels: {}", s.enable_channel);
    if args.streaming {
        println!("   ├─ Fallback: {} (every {} ms)", s.fallback_enabled, s.fallback_interval_ms);
        println!("   ├─ Cache: {} points, {} min TTL", s.cache_max_points, s.cache_ttl_minutes);
        println!("   ├─ Rate limit: {} ms", s.rate_limit_ms);
        println!("   ├─ Connect timeout: {} ms", s.connect_timeout_ms);
        println!("   ├─ Heartbeat: {} ms", s.heartbeat_interval_ms);
        println!(
            "   └─ Reconnect: {} attempts, backoff {}..{} ms",
            s.max_reconnect_attempts, s.backoff_base_ms, s.backoff_cap_ms
        );
    } else {
        println!("   └─ Fallback: {}", s.fallback_enabled);
    }

    println!();
}
