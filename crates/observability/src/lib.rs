//! # Observability
//!
//! 可观测性模块：Tracing + Prometheus 指标。
//!
//! - 日志：`tracing-subscriber`，JSON / Pretty / Compact 三种格式，`RUST_LOG` 优先
//! - 指标：Prometheus exporter，启动时登记所有 feed / channel 指标的说明
//! - 事件指标：见 [`metrics`]，作为订阅回调挂在 registry 上
//!
//! ```ignore
//! observability::init_with_config(ObservabilityConfig {
//!     log_format: LogFormat::Compact,
//!     metrics_port: Some(9000),
//!     default_log_level: "debug".into(),
//! })?;
//!
//! registry.subscribe_feed("ontario_demand", Arc::new(|event| {
//!     observability::record_feed_event("ontario_demand", event);
//! }));
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

pub use crate::metrics::{
    record_cache_depth, record_channel_event, record_feed_event, FeedStats, FeedStatsAggregator,
    MetricsSummary, RunningStats, StatsSummary,
};

/// Transport crates log every frame at debug; keep them at warn unless
/// `RUST_LOG` asks otherwise.
const QUIET_DEPENDENCIES: &[&str] = &["hyper=warn", "reqwest=warn", "tungstenite=warn", "tokio_tungstenite=warn"];

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// Prometheus 端口 (None = 禁用)
    pub metrics_port: Option<u16>,
    /// `RUST_LOG` 未设置时的级别
    pub default_log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            metrics_port: None,
            default_log_level: "info".to_string(),
        }
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    #[default]
    Json,
    /// 人类可读格式
    Pretty,
    /// 紧凑单行格式
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => anyhow::bail!("unknown log format '{other}' (expected json, pretty or compact)"),
        }
    }
}

/// 安装全局 tracing subscriber，并按需启动 Prometheus exporter
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(format_layer(config.log_format))
        .with(env_filter(&config.default_log_level))
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        install_prometheus(port)?;
    }

    tracing::info!(
        log_format = ?config.log_format,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );
    Ok(())
}

/// 仅初始化 Prometheus 指标（Tracing 已在别处初始化）
pub fn init_metrics_only(port: u16) -> Result<()> {
    install_prometheus(port)
}

fn format_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_current_span(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)))
}

fn default_directives(default_level: &str) -> String {
    std::iter::once(default_level)
        .chain(QUIET_DEPENDENCIES.iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

fn install_prometheus(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;
    describe_metrics();

    tracing::info!(port, "Prometheus metrics endpoint initialized");
    Ok(())
}

/// 指标说明，只影响 exporter 输出的 HELP 行
fn describe_metrics() {
    use ::metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

    describe_counter!("feed_live_attempts_total", "Live connection attempts per feed");
    describe_counter!("feed_points_total", "Points produced per feed, split by synthetic flag");
    describe_counter!("feed_protocol_errors_total", "Malformed frames dropped per feed");
    describe_counter!("feed_fallback_engagements_total", "Times a feed switched to synthetic data");
    describe_gauge!("feed_cache_points", "Cached points per feed after the last sweep");
    describe_counter!("feed_cache_expired_total", "Points evicted by the TTL sweeper");
    describe_counter!("dispatch_panics_total", "Subscriber callbacks that panicked");

    describe_counter!("channel_connect_attempts_total", "Channel open attempts");
    describe_counter!("channel_reconnects_total", "Scheduled channel reconnects");
    describe_counter!("channel_stale_heartbeats_total", "Links dropped for heartbeat silence");
    describe_counter!("channel_abandoned_total", "Channels that spent their reconnect budget");
    describe_counter!("channel_send_failures_total", "Outbound writes that failed");
    describe_counter!("channel_queue_full_total", "Messages dropped on a full outbound queue");

    describe_gauge!("energy_feed_live", "1 while the feed is streaming live data");
    describe_gauge!("energy_feed_cache_depth", "Cached points seen by the subscriber");
    describe_histogram!("energy_feed_point_age_ms", Unit::Milliseconds, "Point age at delivery");
    describe_gauge!("energy_channel_connected", "1 while the channel is connected");
    describe_gauge!("energy_channel_participants", "Participants in the channel");
    describe_histogram!(
        "energy_channel_reconnect_delay_ms",
        Unit::Milliseconds,
        "Backoff delay before a channel reconnect"
    );
}
