//! # Feed Cache
//!
//! 每个 feed 的最近数据缓存。
//!
//! 负责：
//! - 每个 feed 最多保留 N 个点（超出时淘汰最旧）
//! - 独立的 TTL 过期（读取时过滤 + 定时清扫）
//! - 两个约束取更严格者
//!
//! 每个 feed 一把锁；外层 map 只在查找/插入 feed 时短暂加锁。

mod buffer;

pub use buffer::FeedBuffer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use contracts::{FeedPoint, MAX_TIMER_INTERVAL};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

/// Cache bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum points kept per feed
    pub max_points: usize,
    /// Entries older than this are never returned
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_points: 100,
            ttl: Duration::from_secs(5 * 60),
        }
    }
}

impl From<&contracts::StreamingConfig> for CacheConfig {
    fn from(config: &contracts::StreamingConfig) -> Self {
        Self {
            max_points: config.cache_max_points,
            ttl: config.cache_ttl(),
        }
    }
}

/// Per-feed bounded cache with TTL expiry
#[derive(Debug)]
pub struct DataCache {
    config: CacheConfig,
    feeds: Mutex<HashMap<String, Arc<Mutex<FeedBuffer>>>>,
}

impl DataCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            feeds: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    fn buffer(&self, feed_name: &str) -> Option<Arc<Mutex<FeedBuffer>>> {
        self.feeds.lock().get(feed_name).cloned()
    }

    fn buffer_or_insert(&self, feed_name: &str) -> Arc<Mutex<FeedBuffer>> {
        let mut feeds = self.feeds.lock();
        Arc::clone(
            feeds
                .entry(feed_name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(FeedBuffer::new(self.config.max_points)))),
        )
    }

    /// Append a point to its feed's buffer
    pub fn push(&self, point: Arc<FeedPoint>) {
        let buffer = self.buffer_or_insert(&point.feed_name);
        let mut buffer = buffer.lock();
        buffer.push(point, Instant::now());
        trace!(len = buffer.len(), "Point cached");
    }

    /// Non-expired points of a feed, oldest first
    pub fn points(&self, feed_name: &str) -> Vec<Arc<FeedPoint>> {
        self.buffer(feed_name)
            .map(|b| b.lock().points(Instant::now(), self.config.ttl))
            .unwrap_or_default()
    }

    /// Most recent non-expired point of a feed
    pub fn latest(&self, feed_name: &str) -> Option<Arc<FeedPoint>> {
        self.buffer(feed_name)
            .and_then(|b| b.lock().latest(Instant::now(), self.config.ttl))
    }

    /// Number of stored entries (expired but unswept entries included)
    pub fn len(&self, feed_name: &str) -> usize {
        self.buffer(feed_name).map(|b| b.lock().len()).unwrap_or(0)
    }

    /// Evict expired entries from every feed; returns the total removed
    pub fn evict_all(&self) -> usize {
        let now = Instant::now();
        let buffers: Vec<(String, Arc<Mutex<FeedBuffer>>)> = self
            .feeds
            .lock()
            .iter()
            .map(|(name, buf)| (name.clone(), Arc::clone(buf)))
            .collect();

        let mut total = 0;
        for (name, buffer) in buffers {
            let mut buffer = buffer.lock();
            let evicted = buffer.evict_expired(now, self.config.ttl);
            metrics::gauge!("feed_cache_points", "feed" => name.clone()).set(buffer.len() as f64);
            if evicted > 0 {
                metrics::counter!("feed_cache_expired_total", "feed" => name.clone())
                    .increment(evicted as u64);
                debug!(feed = %name, evicted, "Expired cache entries evicted");
            }
            total += evicted;
        }
        total
    }

    /// Run `evict_all` every `period` until `cancel` fires
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move { sweeper_loop(cache, period, cancel).await })
    }
}

#[instrument(name = "feed_cache_sweeper", skip(cache, cancel), fields(period_ms = period.as_millis() as u64))]
async fn sweeper_loop(cache: Arc<DataCache>, period: Duration, cancel: CancellationToken) {
    let period = period.clamp(Duration::from_millis(1), MAX_TIMER_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                cache.evict_all();
            }
        }
    }
    debug!("Cache sweeper stopped");
}
