//! Runner - wires the registry to the configured feeds and channels.
//!
//! With the `live` feature the registry talks SSE and WebSocket to the
//! upstream. Without it the in-memory transports are used and every
//! connect attempt is refused, so feeds serve fallback data only.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use contracts::{
    ChannelConnector, ChannelDescriptor, ChannelEvent, FeedConnector, FeedDescriptor, FeedEvent,
    StreamingBlueprint,
};
use observability::{record_cache_depth, record_channel_event, record_feed_event, FeedStatsAggregator};
use parking_lot::Mutex;
use registry::ConnectionRegistry;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::{ChannelReport, FeedReport, RunStats};

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Validated configuration, overrides applied
    pub blueprint: StreamingBlueprint,

    /// Stop after this long (None = until shutdown)
    pub duration: Option<Duration>,

    /// Stop after this many points across all feeds (None = unlimited)
    pub max_points: Option<u64>,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Local participant id on consultation channels
    pub sender_id: String,
}

/// Drives one registry until shutdown, a duration limit or a point limit
pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Run to completion
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<RunStats> {
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        #[cfg(feature = "live")]
        return self.run_live(shutdown).await;

        #[cfg(not(feature = "live"))]
        return self.run_offline(shutdown).await;
    }

    /// Run against the real upstream
    #[cfg(feature = "live")]
    async fn run_live(self, shutdown: impl Future<Output = ()>) -> Result<RunStats> {
        use duplex::WsChannelConnector;
        use ingestion::SseFeedConnector;

        let upstream = &self.config.blueprint.upstream;
        info!(
            feed_base_url = %upstream.feed_base_url,
            channel_url = %upstream.channel_url,
            "Using SSE feeds and WebSocket channels"
        );
        let feeds = SseFeedConnector::new(upstream.feed_base_url.clone())
            .with_auth_token(upstream.auth_token.clone());

        let registry = registry::LiveRegistry::new(
            self.config.blueprint.streaming.clone(),
            Arc::new(feeds),
            Arc::new(WsChannelConnector::new()),
        );
        self.drive(registry, shutdown).await
    }

    /// Run with no network access: every feed degrades to fallback
    #[cfg(not(feature = "live"))]
    async fn run_offline(self, shutdown: impl Future<Output = ()>) -> Result<RunStats> {
        use duplex::MockChannelConnector;
        use ingestion::ScriptedFeedConnector;

        warn!("Live transports not compiled in, running offline");
        let registry = registry::MockRegistry::new(
            self.config.blueprint.streaming.clone(),
            Arc::new(ScriptedFeedConnector::new()),
            Arc::new(MockChannelConnector::new()),
        );
        self.drive(registry, shutdown).await
    }

    async fn drive<F, C>(
        &self,
        registry: ConnectionRegistry<F, C>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<RunStats>
    where
        F: FeedConnector + Sync + 'static,
        C: ChannelConnector + Sync + 'static,
    {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        let aggregator = Arc::new(Mutex::new(FeedStatsAggregator::new()));
        let points = Arc::new(AtomicU64::new(0));
        let channel_messages = Arc::new(AtomicU64::new(0));
        let limit_reached = Arc::new(Notify::new());
        let mut subscriptions = Vec::new();

        // ========== Feeds ==========
        for feed in &blueprint.feeds {
            let name = feed.name.clone();
            let aggregator = Arc::clone(&aggregator);
            let points = Arc::clone(&points);
            let limit_reached = Arc::clone(&limit_reached);
            let cache = Arc::clone(registry.cache());
            let max_points = self.config.max_points;

            // subscribe before connecting so the first `connecting` is seen
            subscriptions.push(registry.subscribe_feed(
                &feed.name,
                Arc::new(move |event: &FeedEvent| {
                    record_feed_event(&name, event);
                    aggregator.lock().update(&name, event);
                    match event {
                        FeedEvent::Data(point) => {
                            record_cache_depth(&name, cache.len(&name));
                            debug!(
                                feed = %name,
                                source = %point.source_id,
                                timestamp = %point.timestamp,
                                "Point received"
                            );
                            let seen = points.fetch_add(1, Ordering::Relaxed) + 1;
                            if max_points.is_some_and(|max| seen >= max) {
                                limit_reached.notify_one();
                            }
                        }
                        FeedEvent::Fallback(_) => {
                            warn!(feed = %name, "Feed switched to fallback data");
                        }
                        _ => {}
                    }
                }),
            ));

            let connection = registry.connect_feed(
                FeedDescriptor::new(&feed.name, &feed.endpoint_path).with_adapter(feed.adapter),
            );
            info!(feed = %feed.name, id = connection.id(), "Feed registered");
        }

        // ========== Channels ==========
        let mut rooms = Vec::new();
        for channel in &blueprint.channels {
            let name = channel.name.clone();
            let channel_messages = Arc::clone(&channel_messages);
            subscriptions.push(registry.subscribe_channel(
                &channel.name,
                Arc::new(move |event: &ChannelEvent| {
                    record_channel_event(&name, event);
                    match event {
                        ChannelEvent::Message(message) => {
                            channel_messages.fetch_add(1, Ordering::Relaxed);
                            info!(
                                channel = %name,
                                kind = message.kind.as_str(),
                                sender = message.sender_id.as_deref().unwrap_or("-"),
                                "Channel message"
                            );
                        }
                        ChannelEvent::ParticipantsChanged(participants) => {
                            info!(channel = %name, ?participants, "Participants changed");
                        }
                        _ => {}
                    }
                }),
            ));

            let mut descriptor =
                ChannelDescriptor::new(&channel.name, &blueprint.upstream.channel_url);
            if let Some(token) = &blueprint.upstream.auth_token {
                descriptor = descriptor.with_auth_token(token.clone());
            }
            descriptor.scope_id = channel.scope_id.clone();

            if descriptor.scope_id.is_some() {
                let room = registry.open_consultation(descriptor, &self.config.sender_id);
                info!(
                    channel = %channel.name,
                    consultation = room.consultation_id(),
                    "Consultation channel registered"
                );
                rooms.push(room);
            } else {
                let connection = registry.connect_channel(descriptor);
                info!(channel = %channel.name, id = connection.id(), "Channel registered");
            }
        }

        let deadline = async {
            match self.config.duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = shutdown => warn!("Received shutdown signal, stopping..."),
            _ = deadline => info!("Run duration elapsed"),
            _ = limit_reached.notified() => info!("Point limit reached"),
        }

        let stats = self.collect(&registry, start_time, &aggregator, &channel_messages);

        for room in rooms {
            room.leave();
        }
        registry.shutdown().await;
        for subscription in &subscriptions {
            subscription.unsubscribe();
        }

        Ok(stats)
    }

    fn collect<F, C>(
        &self,
        registry: &ConnectionRegistry<F, C>,
        start_time: Instant,
        aggregator: &Mutex<FeedStatsAggregator>,
        channel_messages: &AtomicU64,
    ) -> RunStats
    where
        F: FeedConnector + Sync + 'static,
        C: ChannelConnector + Sync + 'static,
    {
        let blueprint = &self.config.blueprint;
        let feeds = blueprint
            .feeds
            .iter()
            .map(|feed| FeedReport {
                name: feed.name.clone(),
                indicator: registry.feed_indicator(&feed.name),
                cached_points: registry.cached_points(&feed.name).len(),
                retries: registry
                    .feed_status(&feed.name)
                    .map(|info| info.retry_count)
                    .unwrap_or(0),
            })
            .collect();

        let channels = blueprint
            .channels
            .iter()
            .map(|channel| {
                let connection = registry.channel_connection(&channel.name);
                ChannelReport {
                    name: channel.name.clone(),
                    status: registry.channel_status(&channel.name).map(|info| info.status),
                    participants: connection.map(|c| c.participants()).unwrap_or_default(),
                }
            })
            .collect();

        RunStats {
            duration: start_time.elapsed(),
            feeds,
            channels,
            channel_messages: channel_messages.load(Ordering::Relaxed),
            summary: aggregator.lock().summary(),
        }
    }
}
