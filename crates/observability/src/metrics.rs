//! Feed / channel 指标收集模块
//!
//! 基于分发的生命周期事件收集 Prometheus 指标，并在内存中聚合摘要。

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use contracts::{ChannelEvent, FeedEvent, FeedPoint};
use metrics::{counter, gauge, histogram};

/// 记录一个 feed 事件
///
/// 作为 feed 订阅回调的一部分调用。
///
/// # Example
///
/// ```ignore
/// registry.subscribe_feed("ontario_demand", Arc::new(|event| {
///     observability::record_feed_event("ontario_demand", event);
/// }));
/// ```
pub fn record_feed_event(feed: &str, event: &FeedEvent) {
    counter!(
        "energy_feed_events_total",
        "feed" => feed.to_string(),
        "kind" => event.kind()
    )
    .increment(1);

    match event {
        FeedEvent::Data(point) => {
            let source = if point.is_synthetic() { "fallback" } else { "live" };
            counter!(
                "energy_feed_points_total",
                "feed" => feed.to_string(),
                "source" => source
            )
            .increment(1);
            histogram!("energy_feed_point_age_ms", "feed" => feed.to_string())
                .record(point_age_ms(point, Utc::now()));
        }
        FeedEvent::Connected(_) => {
            gauge!("energy_feed_live", "feed" => feed.to_string()).set(1.0);
        }
        FeedEvent::Fallback(_) | FeedEvent::Disconnected { .. } => {
            gauge!("energy_feed_live", "feed" => feed.to_string()).set(0.0);
        }
        _ => {}
    }
}

/// 记录一个 channel 事件
pub fn record_channel_event(channel: &str, event: &ChannelEvent) {
    counter!(
        "energy_channel_events_total",
        "channel" => channel.to_string(),
        "kind" => event.kind()
    )
    .increment(1);

    match event {
        ChannelEvent::Connected { .. } => {
            gauge!("energy_channel_connected", "channel" => channel.to_string()).set(1.0);
        }
        ChannelEvent::Error { .. } | ChannelEvent::Disconnected { .. } => {
            gauge!("energy_channel_connected", "channel" => channel.to_string()).set(0.0);
        }
        ChannelEvent::ReconnectScheduled { delay, .. } => {
            histogram!("energy_channel_reconnect_delay_ms", "channel" => channel.to_string())
                .record(delay.as_secs_f64() * 1000.0);
        }
        ChannelEvent::ParticipantsChanged(ids) => {
            gauge!("energy_channel_participants", "channel" => channel.to_string())
                .set(ids.len() as f64);
        }
        _ => {}
    }
}

/// 记录缓存深度
pub fn record_cache_depth(feed: &str, depth: usize) {
    gauge!("energy_feed_cache_depth", "feed" => feed.to_string()).set(depth as f64);
}

/// 数据点的年龄（产生到现在，毫秒；未来时间记为 0）
fn point_age_ms(point: &FeedPoint, now: DateTime<Utc>) -> f64 {
    (now - point.timestamp).num_milliseconds().max(0) as f64
}

/// Feed 事件聚合器
///
/// 在内存中按 feed 聚合事件，便于在运行结束时输出摘要。
#[derive(Debug, Clone, Default)]
pub struct FeedStatsAggregator {
    feeds: HashMap<String, FeedStats>,
}

/// 单个 feed 的聚合统计
#[derive(Debug, Clone, Default)]
pub struct FeedStats {
    /// 实时数据点
    pub live_points: u64,

    /// 合成数据点
    pub synthetic_points: u64,

    /// 被丢弃的畸形帧
    pub data_errors: u64,

    /// 传输错误
    pub errors: u64,

    /// 断开次数
    pub disconnects: u64,

    /// 进入 fallback 的次数
    pub fallbacks: u64,

    /// 相邻数据点的间隔（毫秒）
    pub interval_stats: RunningStats,

    last_point_at: Option<DateTime<Utc>>,
}

impl FeedStatsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update(&mut self, feed: &str, event: &FeedEvent) {
        let stats = self.feeds.entry(feed.to_string()).or_default();
        match event {
            FeedEvent::Data(point) => {
                if point.is_synthetic() {
                    stats.synthetic_points += 1;
                } else {
                    stats.live_points += 1;
                }
                if let Some(prev) = stats.last_point_at {
                    let gap = (point.timestamp - prev).num_milliseconds().max(0);
                    stats.interval_stats.push(gap as f64);
                }
                stats.last_point_at = Some(point.timestamp);
            }
            FeedEvent::DataError { .. } => stats.data_errors += 1,
            FeedEvent::Error { .. } => stats.errors += 1,
            FeedEvent::Disconnected { .. } => stats.disconnects += 1,
            FeedEvent::Fallback(_) => stats.fallbacks += 1,
            FeedEvent::Connecting { .. } | FeedEvent::Connected(_) => {}
        }
    }

    pub fn feed(&self, feed: &str) -> Option<&FeedStats> {
        self.feeds.get(feed)
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        let mut feeds: Vec<(String, FeedStats)> = self
            .feeds
            .iter()
            .map(|(name, stats)| (name.clone(), stats.clone()))
            .collect();
        feeds.sort_by(|a, b| a.0.cmp(&b.0));

        let live: u64 = feeds.iter().map(|(_, s)| s.live_points).sum();
        let synthetic: u64 = feeds.iter().map(|(_, s)| s.synthetic_points).sum();
        let total = live + synthetic;

        MetricsSummary {
            total_points: total,
            live_points: live,
            synthetic_points: synthetic,
            data_errors: feeds.iter().map(|(_, s)| s.data_errors).sum(),
            fallback_rate: if total > 0 {
                synthetic as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            feeds: feeds
                .into_iter()
                .map(|(name, stats)| (name, StatsSummary::from(&stats.interval_stats)))
                .collect(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_points: u64,
    pub live_points: u64,
    pub synthetic_points: u64,
    pub data_errors: u64,
    /// 合成数据点占比（百分比）
    pub fallback_rate: f64,
    /// 各 feed 的数据点间隔统计，按名称排序
    pub feeds: Vec<(String, StatsSummary)>,
}

impl fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Feed Metrics Summary ===")?;
        writeln!(f, "Total points: {}", self.total_points)?;
        writeln!(f, "Live points: {}", self.live_points)?;
        writeln!(
            f,
            "Synthetic points: {} ({:.2}%)",
            self.synthetic_points, self.fallback_rate
        )?;
        writeln!(f, "Malformed frames: {}", self.data_errors)?;

        if !self.feeds.is_empty() {
            writeln!(f, "Point interval (ms):")?;
            for (feed, stats) in &self.feeds {
                writeln!(f, "  {}: {}", feed, stats)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use contracts::{DisconnectReason, FALLBACK_SOURCE_ID};
    use serde_json::Map;
    use std::sync::Arc;

    fn point(source: &str, at: DateTime<Utc>) -> FeedEvent {
        FeedEvent::Data(Arc::new(FeedPoint {
            timestamp: at,
            feed_name: "grid".into(),
            source_id: source.into(),
            values: Map::new(),
            metadata: None,
        }))
    }

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(v);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_update() {
        let mut aggregator = FeedStatsAggregator::new();
        let t0 = Utc::now();

        aggregator.update("grid", &point("ieso", t0));
        aggregator.update("grid", &point("ieso", t0 + Duration::seconds(2)));
        aggregator.update(
            "grid",
            &FeedEvent::Disconnected {
                reason: DisconnectReason::NoData,
            },
        );
        aggregator.update("grid", &point(FALLBACK_SOURCE_ID, t0 + Duration::seconds(4)));

        let stats = aggregator.feed("grid").unwrap();
        assert_eq!(stats.live_points, 2);
        assert_eq!(stats.synthetic_points, 1);
        assert_eq!(stats.disconnects, 1);
        assert_eq!(stats.interval_stats.count(), 2);
        assert!((stats.interval_stats.mean() - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_display() {
        let mut aggregator = FeedStatsAggregator::new();
        let t0 = Utc::now();
        aggregator.update("grid", &point("ieso", t0));
        aggregator.update("grid", &point(FALLBACK_SOURCE_ID, t0));
        aggregator.update("prices", &point(FALLBACK_SOURCE_ID, t0));

        let summary = aggregator.summary();
        assert_eq!(summary.total_points, 3);
        assert_eq!(summary.feeds[0].0, "grid");

        let output = format!("{}", summary);
        assert!(output.contains("Total points: 3"));
        assert!(output.contains("66.67%"));
    }
}
