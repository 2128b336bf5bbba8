//! CLI argument definitions using clap.

use clap::builder::BoolishValueParser;
use clap::{Parser, Subcommand};
use observability::LogFormat;
use std::path::PathBuf;

/// Energy Feed - live energy data feeds and consultation channels
#[derive(Parser, Debug)]
#[command(
    name = "energy-feed",
    author,
    version,
    about = "Live energy data feeds with fallback and consultation channels",
    long_about = "Connects to the configured upstream energy feeds (SSE) and consultation \n\
                  channels (WebSocket), keeps a bounded cache of recent points, falls back \n\
                  to synthetic data when the upstream is unreachable, and reports what it saw."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "ENERGY_FEED_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format (json, pretty, compact)
    #[arg(
        long,
        default_value = "pretty",
        global = true,
        env = "ENERGY_FEED_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default filter directive when `RUST_LOG` is unset
    pub fn default_log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect the configured feeds and channels
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "energy-feed.toml",
        env = "ENERGY_FEED_CONFIG"
    )]
    pub config: PathBuf,

    /// Override `streaming.enable_live_feed`
    #[arg(long, env = "ENERGY_FEED_ENABLE_LIVE", value_parser = BoolishValueParser::new())]
    pub enable_live: Option<bool>,

    /// Override `streaming.enable_channel`
    #[arg(long, env = "ENERGY_FEED_ENABLE_CHANNEL", value_parser = BoolishValueParser::new())]
    pub enable_channel: Option<bool>,

    /// Override `upstream.feed_base_url`
    #[arg(long, env = "ENERGY_FEED_BASE_URL")]
    pub feed_base_url: Option<String>,

    /// Override `upstream.channel_url`
    #[arg(long, env = "ENERGY_FEED_CHANNEL_URL")]
    pub channel_url: Option<String>,

    /// Override `upstream.auth_token`
    #[arg(long, env = "ENERGY_FEED_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Stop after this many seconds (0 = run until Ctrl+C)
    #[arg(long, default_value = "0", env = "ENERGY_FEED_DURATION")]
    pub duration: u64,

    /// Stop after this many points across all feeds (0 = unlimited)
    #[arg(long, default_value = "0", env = "ENERGY_FEED_MAX_POINTS")]
    pub max_points: u64,

    /// Sender id used on outbound channel messages
    #[arg(long, default_value = "energy-feed-cli", env = "ENERGY_FEED_SENDER_ID")]
    pub sender_id: String,

    /// Validate configuration and exit without connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "9000", env = "ENERGY_FEED_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "energy-feed.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "energy-feed.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show the full streaming options
    #[arg(long)]
    pub streaming: bool,
}
