//! Run statistics and final report.

use std::time::Duration;

use contracts::{ConnectionStatus, LiveIndicator};
use observability::MetricsSummary;

/// Final state of one feed
#[derive(Debug, Clone)]
pub struct FeedReport {
    pub name: String,
    pub indicator: LiveIndicator,
    /// Points still inside the cache TTL
    pub cached_points: usize,
    /// Failed live attempts
    pub retries: u32,
}

/// Final state of one channel
#[derive(Debug, Clone)]
pub struct ChannelReport {
    pub name: String,
    pub status: Option<ConnectionStatus>,
    pub participants: Vec<String>,
}

/// Statistics from a run
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Total duration of the run
    pub duration: Duration,

    pub feeds: Vec<FeedReport>,

    pub channels: Vec<ChannelReport>,

    /// Non-control messages received across all channels
    pub channel_messages: u64,

    /// Per-feed point statistics
    pub summary: MetricsSummary,
}

impl RunStats {
    /// Points per second across all feeds
    pub fn points_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.summary.total_points as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n=== Run Statistics ===\n");

        println!("Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Points: {}", self.summary.total_points);
        println!("   ├─ Points/s: {:.2}", self.points_per_sec());
        println!("   └─ Channel messages: {}", self.channel_messages);

        if !self.feeds.is_empty() {
            println!("\nFeeds ({})", self.feeds.len());
            for (i, feed) in self.feeds.iter().enumerate() {
                let prefix = if i == self.feeds.len() - 1 { "└─" } else { "├─" };
                println!(
                    "   {} {}: {} ({} cached, {} retries)",
                    prefix,
                    feed.name,
                    indicator_label(feed.indicator),
                    feed.cached_points,
                    feed.retries
                );
            }
        }

        if !self.channels.is_empty() {
            println!("\nChannels ({})", self.channels.len());
            for (i, channel) in self.channels.iter().enumerate() {
                let prefix = if i == self.channels.len() - 1 { "└─" } else { "├─" };
                println!(
                    "   {} {}: {} ({} participants)",
                    prefix,
                    channel.name,
                    channel.status.map(|s| s.as_str()).unwrap_or("released"),
                    channel.participants.len()
                );
            }
        }

        println!("\n{}", self.summary);
    }
}

fn indicator_label(indicator: LiveIndicator) -> &'static str {
    match indicator {
        LiveIndicator::Connecting => "connecting",
        LiveIndicator::Live => "live",
        LiveIndicator::Fallback => "fallback",
        LiveIndicator::Offline => "offline",
    }
}
