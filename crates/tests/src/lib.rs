//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 合约快照测试
//! - 通过 registry 的端到端场景（mock transport，无需网络）
//! - 缓存 / 分发的性质测试

#[cfg(test)]
mod contract_tests {
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{AdapterKind, ConfigVersion};

    #[test]
    fn test_contracts_compile() {
        // 验证 contracts crate 可编译
        let _ = ConfigVersion::V1;
    }

    #[test]
    fn test_example_config_loads() {
        let blueprint = ConfigLoader::load_from_str(
            r#"
[streaming]
enable_live_feed = true
enable_channel = true
heartbeat_interval_ms = 20000

[upstream]
feed_base_url = "https://example.supabase.co"
channel_url = "wss://example.supabase.co/realtime/v1/websocket"
auth_token = "anon-key"

[[feeds]]
name = "ontario_demand"
endpoint_path = "/functions/v1/stream-ontario-demand"
adapter = "rows"

[[feeds]]
name = "provincial_generation"
endpoint_path = "/functions/v1/stream-provincial-generation"

[[channels]]
name = "consultation-42"
scope_id = "42"
"#,
            ConfigFormat::Toml,
        )
        .unwrap();

        assert_eq!(blueprint.version, ConfigVersion::V1);
        assert_eq!(blueprint.feeds.len(), 2);
        assert_eq!(blueprint.feeds[0].adapter, AdapterKind::Rows);
        assert_eq!(blueprint.feeds[1].adapter, AdapterKind::Envelope);
        assert_eq!(blueprint.streaming.heartbeat_interval_ms, 20_000);
        // untouched options keep their defaults
        assert_eq!(blueprint.streaming.max_reconnect_attempts, 3);
        assert_eq!(blueprint.channels[0].scope_id.as_deref(), Some("42"));
    }
}

#[cfg(test)]
mod support {
    use std::sync::Arc;

    use contracts::{ChannelEvent, FeedEvent, StreamingConfig};
    use dispatcher::Subscription;
    use duplex::MockChannelConnector;
    use ingestion::ScriptedFeedConnector;
    use parking_lot::Mutex;
    use registry::MockRegistry;

    pub fn live_config() -> StreamingConfig {
        StreamingConfig {
            enable_live_feed: true,
            enable_channel: true,
            ..StreamingConfig::default()
        }
    }

    pub fn registry(
        config: StreamingConfig,
    ) -> (MockRegistry, Arc<ScriptedFeedConnector>, Arc<MockChannelConnector>) {
        let feeds = Arc::new(ScriptedFeedConnector::new());
        let channels = Arc::new(MockChannelConnector::new());
        let registry = MockRegistry::new(config, Arc::clone(&feeds), Arc::clone(&channels));
        (registry, feeds, channels)
    }

    pub type Recorded<E> = Arc<Mutex<Vec<E>>>;

    pub fn record_feed(registry: &MockRegistry, name: &str) -> (Recorded<FeedEvent>, Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let sub = registry.subscribe_feed(
            name,
            Arc::new(move |e: &FeedEvent| sink.lock().push(e.clone())),
        );
        (events, sub)
    }

    pub fn record_channel(
        registry: &MockRegistry,
        name: &str,
    ) -> (Recorded<ChannelEvent>, Subscription) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let sub = registry.subscribe_channel(
            name,
            Arc::new(move |e: &ChannelEvent| sink.lock().push(e.clone())),
        );
        (events, sub)
    }

    pub fn feed_kinds(events: &Recorded<FeedEvent>) -> Vec<&'static str> {
        events.lock().iter().map(FeedEvent::kind).collect()
    }

    pub fn channel_kinds(events: &Recorded<ChannelEvent>) -> Vec<&'static str> {
        events.lock().iter().map(ChannelEvent::kind).collect()
    }
}

#[cfg(test)]
mod feed_scenarios {
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{
        ConnectionStatus, DisconnectReason, FeedDescriptor, FeedEvent, FeedMode, LiveIndicator,
        StreamingConfig,
    };
    use ingestion::FeedScript;
    use observability::FeedStatsAggregator;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::time::Instant;

    use crate::support::{feed_kinds, live_config, record_feed, registry};

    /// open → 3 points → `{error:"no data"}` → fallback with synthetic data
    #[tokio::test(start_paused = true)]
    async fn test_grid_demand_falls_back_after_upstream_error() {
        let (registry, feeds, _) = registry(live_config());
        feeds.push(FeedScript::open(vec![
            r#"{"source":"ieso","demand":15200}"#,
            r#"{"source":"ieso","demand":16000}"#,
            r#"{"source":"ieso","demand":15800}"#,
            r#"{"error":"no data"}"#,
        ]));

        let (events, _sub) = record_feed(&registry, "grid-demand");
        let stats = Arc::new(Mutex::new(FeedStatsAggregator::new()));
        let agg = Arc::clone(&stats);
        let _stats_sub = registry.subscribe_feed(
            "grid-demand",
            Arc::new(move |e: &FeedEvent| agg.lock().update("grid-demand", e)),
        );

        let connection = registry.connect_feed(FeedDescriptor::new(
            "grid-demand",
            "/functions/v1/stream-ontario-demand",
        ));
        let info = connection.wait_until(|i| i.mode == FeedMode::Fallback).await;
        assert_eq!(info.status, ConnectionStatus::Connected);

        // fallback emits immediately, then every 5s
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(
            feed_kinds(&events),
            [
                "connecting",
                "connected",
                "data",
                "data",
                "data",
                "disconnected",
                "fallback",
                "data",
                "data",
                "data"
            ]
        );

        let events = events.lock();
        let live: Vec<_> = events[2..5]
            .iter()
            .filter_map(FeedEvent::point)
            .map(|p| p.values["demand"].clone())
            .collect();
        assert_eq!(live, vec![json!(15200), json!(16000), json!(15800)]);
        assert!(matches!(
            events[5],
            FeedEvent::Disconnected {
                reason: DisconnectReason::UpstreamError
            }
        ));
        assert!(events[7..]
            .iter()
            .filter_map(FeedEvent::point)
            .all(|p| p.is_synthetic()));
        drop(events);

        assert_eq!(registry.feed_indicator("grid-demand"), LiveIndicator::Fallback);
        assert!(registry.latest_point("grid-demand").unwrap().is_synthetic());

        let summary = stats.lock().summary();
        assert_eq!(summary.live_points, 3);
        assert_eq!(summary.synthetic_points, 3);
        assert_eq!(stats.lock().feed("grid-demand").unwrap().fallbacks, 1);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_preserve_receipt_order() {
        let (registry, feeds, _) = registry(live_config());
        let frames: Vec<String> = (1..=20).map(|i| format!(r#"{{"seq":{i}}}"#)).collect();
        feeds.push(FeedScript::open(frames));

        let (events, _sub) = record_feed(&registry, "prices");
        registry.connect_feed(FeedDescriptor::new("prices", "/stream-prices"));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let seqs: Vec<i64> = events
            .lock()
            .iter()
            .filter_map(FeedEvent::point)
            .filter_map(|p| p.values["seq"].as_i64())
            .collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<_>>());
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_reaches_fallback_with_data() {
        let config = StreamingConfig {
            connect_timeout_ms: 2_000,
            ..live_config()
        };
        let (registry, feeds, _) = registry(config);
        feeds.push(FeedScript::hang());

        let (events, _sub) = record_feed(&registry, "grid");
        let started = Instant::now();
        let connection = registry.connect_feed(FeedDescriptor::new("grid", "/stream-grid"));
        let info = connection.wait_until(|i| i.mode == FeedMode::Fallback).await;

        assert!(started.elapsed() <= Duration::from_millis(2_010));
        assert_eq!(info.status, ConnectionStatus::Connected);
        assert_eq!(info.retry_count, 1);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(registry.latest_point("grid").is_some());
        assert!(events.lock().iter().any(|e| matches!(
            e,
            FeedEvent::Disconnected {
                reason: DisconnectReason::Timeout
            }
        )));
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent_until_disconnect() {
        let (registry, feeds, _) = registry(live_config());
        feeds.push(FeedScript::open(vec![r#"{"demand":1}"#]));

        let a = registry.connect_feed(FeedDescriptor::new("grid", "/stream-grid"));
        let b = registry.connect_feed(FeedDescriptor::new("grid", "/stream-grid"));
        assert_eq!(a.id(), b.id());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(feeds.attempts(), 1);

        assert!(registry.disconnect("grid"));
        let c = registry.connect_feed(FeedDescriptor::new("grid", "/stream-grid"));
        assert_ne!(a.id(), c.id());
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_disabled_serves_fallback_only() {
        let (registry, feeds, _) = registry(StreamingConfig::default());
        let (events, _sub) = record_feed(&registry, "grid");

        registry.connect_feed(FeedDescriptor::new("grid", "/stream-grid"));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(feed_kinds(&events), ["fallback", "data"]);
        assert_eq!(feeds.attempts(), 0);
        assert_eq!(registry.feed_indicator("grid"), LiveIndicator::Fallback);
        registry.shutdown().await;
    }
}

#[cfg(test)]
mod channel_scenarios {
    use std::time::Duration;

    use contracts::{
        ChannelDescriptor, ChannelEvent, ChannelMessage, ConnectionStatus, DisconnectReason,
        FailureKind, StreamingConfig,
    };
    use duplex::LinkScript;

    use crate::support::{channel_kinds, live_config, record_channel, registry};

    const ENDPOINT: &str = "wss://example.test/realtime";

    #[tokio::test(start_paused = true)]
    async fn test_pings_under_interval_keep_channel_connected() {
        let (registry, _, channels) = registry(live_config());
        channels.push(LinkScript::Accept);
        let (events, _sub) = record_channel(&registry, "ops");

        let connection = registry.connect_channel(ChannelDescriptor::new("ops", ENDPOINT));
        connection
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        let remote = channels.remote(0).unwrap();

        // heartbeat interval is 15s
        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            remote.push(&ChannelMessage::ping());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(connection.status(), ConnectionStatus::Connected);
        assert_eq!(connection.info().reconnect_count, 0);
        let kinds = channel_kinds(&events);
        assert!(!kinds.contains(&"reconnect_scheduled"));
        assert!(!kinds.contains(&"error"));
        assert_eq!(channels.attempts(), 1);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_error_backs_off_then_stops_retrying() {
        let (registry, _, channels) = registry(live_config());
        // later attempts have no script and are refused
        channels.push(LinkScript::Accept);
        let (events, _sub) = record_channel(&registry, "ops");

        let connection = registry.connect_channel(
            ChannelDescriptor::new("ops", ENDPOINT).with_auth_token("secret"),
        );
        connection
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        channels.remote(0).unwrap().fail("connection reset by peer");

        connection
            .wait_until(|i| i.status == ConnectionStatus::Error)
            .await;
        let info = connection
            .wait_until(|i| i.status == ConnectionStatus::Disconnected)
            .await;
        assert_eq!(info.reconnect_count, 3);

        let delays: Vec<Duration> = events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ChannelEvent::ReconnectScheduled { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert!(matches!(
            events.lock().last(),
            Some(ChannelEvent::Disconnected {
                reason: DisconnectReason::Abandoned
            })
        ));

        // every reconnect reuses the original endpoint and credentials
        let descriptors = channels.descriptors();
        assert_eq!(descriptors.len(), 4);
        assert!(descriptors
            .iter()
            .all(|d| d.endpoint == ENDPOINT && d.auth_token.as_deref() == Some("secret")));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(channels.attempts(), 4);
        assert_eq!(connection.status(), ConnectionStatus::Disconnected);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_link_goes_stale_and_reconnects() {
        let config = StreamingConfig {
            heartbeat_interval_ms: 1_000,
            ..live_config()
        };
        let (registry, _, channels) = registry(config);
        channels.push(LinkScript::Accept);
        channels.push(LinkScript::Accept);
        let (events, _sub) = record_channel(&registry, "consultation-7");

        let connection =
            registry.connect_channel(ChannelDescriptor::consultation("7", ENDPOINT));
        // silent for more than 3 intervals, then one 1s backoff
        tokio::time::sleep(Duration::from_millis(5_500)).await;

        assert_eq!(
            channel_kinds(&events),
            ["connecting", "connected", "error", "reconnect_scheduled", "connecting", "connected"]
        );
        assert!(matches!(
            events.lock()[2],
            ChannelEvent::Error {
                kind: FailureKind::StaleConnection,
                ..
            }
        ));
        assert_eq!(connection.status(), ConnectionStatus::Connected);
        assert_eq!(channels.attempts(), 2);
        assert_eq!(registry.channel_metrics().snapshot().stale_heartbeats, 1);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_consultation_room_round_trip() {
        let (registry, _, channels) = registry(live_config());
        channels.push(LinkScript::Accept);

        let room = registry.open_consultation(
            ChannelDescriptor::consultation("42", ENDPOINT),
            "dr-lee",
        );
        room.connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        let remote = channels.remote(0).unwrap();

        remote.push_raw(r#"{"type":"participant_joined","payload":{},"senderId":"patient-1"}"#);
        remote.push_raw(
            r#"{"type":"consultation_message","payload":{"content":"hello"},"senderId":"patient-1"}"#,
        );
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(room.participants(), vec!["patient-1".to_string()]);
        let messages = room.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].payload["content"], "hello");

        assert!(room.send_message("how are you feeling?", "text"));
        tokio::time::sleep(Duration::from_millis(1)).await;
        let sent = remote.sent_messages();
        let last = sent.last().unwrap();
        assert_eq!(last.payload["content"], "how are you feeling?");
        assert_eq!(last.payload["consultationId"], "42");
        assert_eq!(last.sender_id.as_deref(), Some("dr-lee"));

        room.leave();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(registry.channel_connection("consultation-42").is_none());
        registry.shutdown().await;
    }
}

#[cfg(test)]
mod property_tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use contracts::{FeedDescriptor, FeedEvent, FeedPoint, StreamingConfig};
    use dispatcher::Subscription;
    use feed_cache::{CacheConfig, DataCache};
    use parking_lot::Mutex;
    use serde_json::Map;

    use crate::support::registry;

    fn point(feed: &str, seq: i64) -> Arc<FeedPoint> {
        let mut values = Map::new();
        values.insert("seq".to_string(), seq.into());
        Arc::new(FeedPoint {
            timestamp: Utc::now(),
            feed_name: feed.to_string(),
            source_id: "test".to_string(),
            values,
            metadata: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_bounds_hold_for_several_configs() {
        for (max_points, ttl_secs) in [(1, 10), (3, 60), (50, 5)] {
            let ttl = Duration::from_secs(ttl_secs);
            let cache = DataCache::new(CacheConfig { max_points, ttl });

            for seq in 0..(max_points as i64 * 3) {
                cache.push(point("grid", seq));
                assert!(cache.len("grid") <= max_points);
                tokio::time::advance(Duration::from_millis(100)).await;
            }

            let points = cache.points("grid");
            assert!(!points.is_empty() && points.len() <= max_points);
            let last = points.last().unwrap().values["seq"].as_i64().unwrap();
            assert_eq!(last, max_points as i64 * 3 - 1);

            tokio::time::advance(ttl + Duration::from_secs(1)).await;
            assert!(cache.points("grid").is_empty());
            assert!(cache.latest("grid").is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_cache_respects_max_points() {
        let config = StreamingConfig {
            cache_max_points: 2,
            fallback_interval_ms: 1_000,
            ..StreamingConfig::default()
        };
        let (registry, _, _) = registry(config);
        let _sub = registry.subscribe_feed("grid", Arc::new(|_: &FeedEvent| {}));
        registry.connect_feed(FeedDescriptor::new("grid", "/stream-grid"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(registry.cached_points("grid").len(), 2);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_inside_own_callback() {
        let (registry, _, _) = registry(StreamingConfig {
            fallback_interval_ms: 1_000,
            ..StreamingConfig::default()
        });

        let own_calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::clone(&own_calls);
        let me = Arc::clone(&slot);
        let sub = registry.subscribe_feed(
            "grid",
            Arc::new(move |_: &FeedEvent| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Some(sub) = me.lock().as_ref() {
                    sub.unsubscribe();
                }
            }),
        );
        *slot.lock() = Some(sub);

        let other_calls = Arc::new(AtomicUsize::new(0));
        let calls = Arc::clone(&other_calls);
        let _other = registry.subscribe_feed(
            "grid",
            Arc::new(move |_: &FeedEvent| {
                calls.fetch_add(1, Ordering::SeqCst);
            }),
        );

        registry.connect_feed(FeedDescriptor::new("grid", "/stream-grid"));
        tokio::time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(own_calls.load(Ordering::SeqCst), 1);
        // fallback + 4 data points
        assert_eq!(other_calls.load(Ordering::SeqCst), 5);
        // the remaining subscriber keeps the feed alive
        assert!(registry.feed_connection("grid").is_some());
        registry.shutdown().await;
    }
}
