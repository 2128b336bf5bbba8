//! ConnectionRegistry - the façade the application talks to
//!
//! An explicit context object: create one per process and hand clones to
//! whoever needs feeds or channels. Map locks are held only long enough to
//! insert, look up or remove a handle; each connection serialises its own
//! state inside its task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use config_loader::ConfigLoader;
use contracts::{
    ChannelCallback, ChannelConnectionInfo, ChannelConnector, ChannelDescriptor, ChannelMessage,
    ConnectionStatus, FeedCallback, FeedConnectionInfo, FeedConnector, FeedDescriptor, FeedPoint,
    LiveIndicator, StreamError, StreamingConfig,
};
use dispatcher::{ChannelDispatcher, FeedDispatcher, Subscription};
use duplex::{
    ChannelConnection, ChannelContext, ChannelHandle, ChannelMetrics, ChannelOptions,
    ConsultationRoom,
};
use feed_cache::{CacheConfig, DataCache};
use ingestion::{
    DailyProfileGenerator, FeedConnection, FeedContext, FeedHandle, FeedMetrics, FeedOptions,
    SyntheticGenerator,
};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Feed and channel connections keyed by name
pub struct ConnectionRegistry<F, C> {
    inner: Arc<Inner<F, C>>,
}

impl<F, C> Clone for ConnectionRegistry<F, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<F, C> {
    config: RwLock<StreamingConfig>,
    feed_connector: Arc<F>,
    channel_connector: Arc<C>,
    feed_ctx: FeedContext,
    channel_ctx: ChannelContext,
    feeds: Mutex<HashMap<String, FeedHandle>>,
    channels: Mutex<HashMap<String, ChannelHandle>>,
    /// Start time of the latest scheduled live attempt per feed
    live_attempts: Mutex<HashMap<String, Instant>>,
    next_id: AtomicU64,
    sweeper_cancel: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<F, C> Inner<F, C> {
    fn release_feed(&self, name: &str) -> bool {
        let handle = self.feeds.lock().remove(name);
        match handle {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    fn release_channel(&self, name: &str) -> bool {
        let handle = self.channels.lock().remove(name);
        match handle {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    fn connection_id(&self, name: &str) -> String {
        format!("{name}-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Delay before the next live attempt for `name` may start
    fn reserve_live_attempt(&self, name: &str, spacing: Duration) -> Duration {
        let now = Instant::now();
        let mut attempts = self.live_attempts.lock();
        let start = match attempts.get(name) {
            Some(last) => (*last + spacing).max(now),
            None => now,
        };
        attempts.insert(name.to_string(), start);
        start - now
    }
}

impl<F, C> ConnectionRegistry<F, C>
where
    F: FeedConnector + Sync + 'static,
    C: ChannelConnector + Sync + 'static,
{
    /// Create the registry and start the cache sweeper
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(config: StreamingConfig, feed_connector: Arc<F>, channel_connector: Arc<C>) -> Self {
        Self::with_generator(
            config,
            feed_connector,
            channel_connector,
            Arc::new(DailyProfileGenerator::default()),
        )
    }

    /// Like [`new`](Self::new) with a custom fallback generator
    pub fn with_generator(
        config: StreamingConfig,
        feed_connector: Arc<F>,
        channel_connector: Arc<C>,
        generator: Arc<dyn SyntheticGenerator>,
    ) -> Self {
        let cache = Arc::new(DataCache::new(CacheConfig::from(&config)));
        let sweeper_cancel = CancellationToken::new();
        let sweeper = cache.spawn_sweeper(config.cache_sweep_interval(), sweeper_cancel.clone());

        info!(
            enable_live_feed = config.enable_live_feed,
            enable_channel = config.enable_channel,
            fallback_enabled = config.fallback_enabled,
            "Connection registry started"
        );

        let inner = Arc::new(Inner {
            config: RwLock::new(config),
            feed_connector,
            channel_connector,
            feed_ctx: FeedContext {
                dispatcher: FeedDispatcher::new("feed"),
                cache,
                generator,
                metrics: Arc::new(FeedMetrics::new()),
            },
            channel_ctx: ChannelContext {
                dispatcher: ChannelDispatcher::new("channel"),
                metrics: Arc::new(ChannelMetrics::new()),
            },
            feeds: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            live_attempts: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            sweeper_cancel,
            sweeper: Mutex::new(Some(sweeper)),
        });
        install_idle_hooks(&inner);

        Self { inner }
    }

    // ========== Feeds ==========

    /// Return the feed's connection, creating and starting it if needed
    ///
    /// Idempotent until the feed is disconnected. Never fails: an
    /// unreachable upstream degrades to fallback data.
    #[instrument(name = "registry_connect_feed", skip(self, descriptor), fields(feed = %descriptor.feed_name))]
    pub fn connect_feed(&self, descriptor: FeedDescriptor) -> FeedConnection {
        let inner = &self.inner;
        let mut feeds = inner.feeds.lock();
        if let Some(existing) = feeds.get(&descriptor.feed_name) {
            debug!(id = existing.connection().id(), "Feed already connected");
            return existing.connection().clone();
        }

        let config = inner.config.read().clone();
        let start_delay = if config.enable_live_feed {
            inner.reserve_live_attempt(&descriptor.feed_name, config.rate_limit())
        } else {
            Duration::ZERO
        };
        let options = FeedOptions::from_config(&config).with_start_delay(start_delay);

        let name = descriptor.feed_name.clone();
        let handle = FeedHandle::spawn(
            inner.connection_id(&name),
            descriptor,
            Arc::clone(&inner.feed_connector),
            options,
            inner.feed_ctx.clone(),
        );
        let connection = handle.connection().clone();
        feeds.insert(name, handle);

        info!(id = connection.id(), "Feed connection created");
        connection
    }

    /// Register `callback` for events of feed `name`
    ///
    /// Does not create a connection. When the last subscriber of a feed
    /// unsubscribes, the feed is disconnected.
    pub fn subscribe_feed(&self, name: &str, callback: FeedCallback) -> Subscription {
        self.inner.feed_ctx.dispatcher.subscribe(name, callback)
    }

    /// Cached, unexpired points of feed `name`, oldest first
    pub fn cached_points(&self, name: &str) -> Vec<Arc<FeedPoint>> {
        self.inner.feed_ctx.cache.points(name)
    }

    pub fn latest_point(&self, name: &str) -> Option<Arc<FeedPoint>> {
        self.inner.feed_ctx.cache.latest(name)
    }

    pub fn feed_connection(&self, name: &str) -> Option<FeedConnection> {
        self.inner
            .feeds
            .lock()
            .get(name)
            .map(|handle| handle.connection().clone())
    }

    pub fn feed_status(&self, name: &str) -> Option<FeedConnectionInfo> {
        self.feed_connection(name).map(|c| c.info())
    }

    /// UI indicator for feed `name`; `Offline` when not connected at all
    pub fn feed_indicator(&self, name: &str) -> LiveIndicator {
        self.feed_connection(name)
            .map_or(LiveIndicator::Offline, |c| c.indicator())
    }

    pub fn feed_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.feeds.lock().keys().cloned().collect();
        names.sort();
        names
    }

    // ========== Channels ==========

    /// Return the channel's connection, creating and starting it if needed
    ///
    /// With channels disabled the returned connection is permanently
    /// `disconnected`.
    #[instrument(name = "registry_connect_channel", skip(self, descriptor), fields(channel = %descriptor.channel_name))]
    pub fn connect_channel(&self, descriptor: ChannelDescriptor) -> ChannelConnection {
        self.connect_channel_as(descriptor, None)
    }

    /// `sender_id` replaces the system id on join/leave messages
    fn connect_channel_as(
        &self,
        descriptor: ChannelDescriptor,
        sender_id: Option<&str>,
    ) -> ChannelConnection {
        let inner = &self.inner;
        let mut channels = inner.channels.lock();
        if let Some(existing) = channels.get(&descriptor.channel_name) {
            debug!(id = existing.connection().id(), "Channel already connected");
            return existing.connection().clone();
        }

        let config = inner.config.read().clone();
        let name = descriptor.channel_name.clone();
        let id = inner.connection_id(&name);
        let handle = if config.enable_channel {
            let mut options = ChannelOptions::from_config(&config);
            if let Some(sender_id) = sender_id {
                options = options.with_sender_id(sender_id);
            }
            ChannelHandle::spawn(
                id,
                descriptor,
                Arc::clone(&inner.channel_connector),
                options,
                inner.channel_ctx.clone(),
            )
        } else {
            info!("Channels disabled by configuration, channel stays disconnected");
            ChannelHandle::disabled(id, &name)
        };
        let connection = handle.connection().clone();
        channels.insert(name, handle);

        info!(id = connection.id(), "Channel connection created");
        connection
    }

    /// Connect a consultation channel and attach a room consumer to it
    ///
    /// `sender_id` identifies the local participant on outbound messages,
    /// including the scope join/leave of a newly created channel.
    pub fn open_consultation(
        &self,
        descriptor: ChannelDescriptor,
        sender_id: &str,
    ) -> ConsultationRoom {
        let consultation_id = descriptor
            .scope_id
            .clone()
            .unwrap_or_else(|| descriptor.channel_name.clone());
        let window = self.inner.config.read().recent_message_window;
        let connection = self.connect_channel_as(descriptor, Some(sender_id));
        ConsultationRoom::attach(
            consultation_id,
            sender_id,
            connection,
            &self.inner.channel_ctx.dispatcher,
            window,
        )
    }

    /// Send `message` on channel `name`
    ///
    /// Logged and dropped (returns `false`) if the channel is unknown or
    /// not connected.
    pub fn send_channel_message(&self, name: &str, message: ChannelMessage) -> bool {
        match self.channel_connection(name) {
            Some(connection) => connection.send(message),
            None => {
                warn!(channel = name, kind = %message.kind, "Unknown channel, message dropped");
                false
            }
        }
    }

    /// Register `callback` for events of channel `name`
    pub fn subscribe_channel(&self, name: &str, callback: ChannelCallback) -> Subscription {
        self.inner.channel_ctx.dispatcher.subscribe(name, callback)
    }

    pub fn channel_connection(&self, name: &str) -> Option<ChannelConnection> {
        self.inner
            .channels
            .lock()
            .get(name)
            .map(|handle| handle.connection().clone())
    }

    pub fn channel_status(&self, name: &str) -> Option<ChannelConnectionInfo> {
        self.channel_connection(name).map(|c| c.info())
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.channels.lock().keys().cloned().collect();
        names.sort();
        names
    }

    // ========== Lifecycle ==========

    /// Status of the feed or channel called `name` (feeds first)
    pub fn connection_status(&self, name: &str) -> Option<ConnectionStatus> {
        self.feed_connection(name)
            .map(|c| c.status())
            .or_else(|| self.channel_connection(name).map(|c| c.status()))
    }

    /// Release the feed and/or channel called `name`; idempotent
    ///
    /// Cancels pending timers and in-flight attempts; nothing is
    /// dispatched for the released connection afterwards. Returns whether
    /// anything was registered under `name`.
    #[instrument(name = "registry_disconnect", skip(self))]
    pub fn disconnect(&self, name: &str) -> bool {
        let feed = self.inner.release_feed(name);
        let channel = self.inner.release_channel(name);
        if feed || channel {
            info!(feed, channel, "Connection released");
        } else {
            debug!("Nothing to disconnect");
        }
        feed || channel
    }

    /// Apply a runtime configuration change
    ///
    /// Affects connections created afterwards; cache bounds are fixed at
    /// construction.
    ///
    /// # Errors
    /// `StreamError::ConfigValidation` if the result is invalid; the
    /// current configuration is then left untouched.
    pub fn update_config(
        &self,
        update: impl FnOnce(&mut StreamingConfig),
    ) -> Result<(), StreamError> {
        let mut next = self.inner.config.read().clone();
        update(&mut next);
        ConfigLoader::validate_streaming(&next)?;
        *self.inner.config.write() = next;
        info!("Streaming configuration updated");
        Ok(())
    }

    pub fn config(&self) -> StreamingConfig {
        self.inner.config.read().clone()
    }

    pub fn cache(&self) -> &Arc<DataCache> {
        &self.inner.feed_ctx.cache
    }

    pub fn feed_dispatcher(&self) -> &FeedDispatcher {
        &self.inner.feed_ctx.dispatcher
    }

    pub fn channel_dispatcher(&self) -> &ChannelDispatcher {
        &self.inner.channel_ctx.dispatcher
    }

    pub fn feed_metrics(&self) -> &FeedMetrics {
        &self.inner.feed_ctx.metrics
    }

    pub fn channel_metrics(&self) -> &ChannelMetrics {
        &self.inner.channel_ctx.metrics
    }

    /// Disconnect everything and stop the cache sweeper
    #[instrument(name = "registry_shutdown", skip(self))]
    pub async fn shutdown(&self) {
        let feeds: Vec<FeedHandle> = self.inner.feeds.lock().drain().map(|(_, h)| h).collect();
        let channels: Vec<ChannelHandle> =
            self.inner.channels.lock().drain().map(|(_, h)| h).collect();
        info!(
            feeds = feeds.len(),
            channels = channels.len(),
            "Shutting down connection registry"
        );

        for handle in &feeds {
            handle.cancel();
        }
        for handle in &channels {
            handle.cancel();
        }
        for handle in feeds {
            handle.shutdown().await;
        }
        for handle in channels {
            handle.shutdown().await;
        }

        self.inner.sweeper_cancel.cancel();
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(task) = sweeper {
            if let Err(e) = task.await {
                error!(error = ?e, "Cache sweeper panicked");
            }
        }
    }
}

/// Last unsubscribe of a name releases its connection
fn install_idle_hooks<F, C>(inner: &Arc<Inner<F, C>>)
where
    F: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    let weak: Weak<Inner<F, C>> = Arc::downgrade(inner);
    inner
        .feed_ctx
        .dispatcher
        .set_idle_hook(Arc::new(move |name: &str| {
            if let Some(inner) = weak.upgrade() {
                if inner.release_feed(name) {
                    info!(feed = name, "Last subscriber left, feed released");
                }
            }
        }));

    let weak: Weak<Inner<F, C>> = Arc::downgrade(inner);
    inner
        .channel_ctx
        .dispatcher
        .set_idle_hook(Arc::new(move |name: &str| {
            if let Some(inner) = weak.upgrade() {
                if inner.release_channel(name) {
                    info!(channel = name, "Last subscriber left, channel released");
                }
            }
        }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{ChannelMessageType, FeedEvent, FeedMode};
    use duplex::{LinkScript, MockChannelConnector};
    use ingestion::{FeedScript, ScriptedFeedConnector};
    use serde_json::json;

    type TestRegistry = ConnectionRegistry<ScriptedFeedConnector, MockChannelConnector>;

    fn live_config() -> StreamingConfig {
        StreamingConfig {
            enable_live_feed: true,
            enable_channel: true,
            ..StreamingConfig::default()
        }
    }

    fn registry(
        config: StreamingConfig,
    ) -> (TestRegistry, Arc<ScriptedFeedConnector>, Arc<MockChannelConnector>) {
        let feeds = Arc::new(ScriptedFeedConnector::new());
        let channels = Arc::new(MockChannelConnector::new());
        let registry = ConnectionRegistry::new(config, Arc::clone(&feeds), Arc::clone(&channels));
        (registry, feeds, channels)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_feed_is_idempotent() {
        let (registry, feeds, _) = registry(live_config());
        feeds.push(FeedScript::open(vec![r#"{"demand":1}"#]));

        let a = registry.connect_feed(FeedDescriptor::new("grid", "/grid"));
        let b = registry.connect_feed(FeedDescriptor::new("grid", "/grid"));
        assert_eq!(a.id(), b.id());
        assert_eq!(registry.feed_names(), vec!["grid"]);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(feeds.attempts(), 1);
        assert_eq!(registry.feed_indicator("grid"), LiveIndicator::Live);
        assert_eq!(registry.cached_points("grid").len(), 1);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent_and_silences_feed() {
        let (registry, _, _) = registry(StreamingConfig::default());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = registry.subscribe_feed(
            "grid",
            Arc::new(move |e: &FeedEvent| sink.lock().push(e.kind())),
        );

        let connection = registry.connect_feed(FeedDescriptor::new("grid", "/grid"));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(connection.mode(), FeedMode::Fallback);

        assert!(registry.disconnect("grid"));
        assert!(!registry.disconnect("grid"));
        let seen = events.lock().len();
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(events.lock().len(), seen);
        assert_eq!(connection.status(), ConnectionStatus::Disconnected);
        assert_eq!(registry.connection_status("grid"), None);
        assert_eq!(registry.feed_indicator("grid"), LiveIndicator::Offline);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_unsubscribe_releases_feed() {
        let (registry, _, _) = registry(StreamingConfig::default());
        let a = registry.subscribe_feed("grid", Arc::new(|_: &FeedEvent| {}));
        let b = registry.subscribe_feed("grid", Arc::new(|_: &FeedEvent| {}));
        registry.connect_feed(FeedDescriptor::new("grid", "/grid"));

        a.unsubscribe();
        assert!(registry.feed_connection("grid").is_some());
        b.unsubscribe();
        assert!(registry.feed_connection("grid").is_none());
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_attempts_are_rate_limited() {
        let (registry, feeds, _) = registry(live_config());
        feeds.push(FeedScript::refuse("down"));
        feeds.push(FeedScript::refuse("down"));

        registry.connect_feed(FeedDescriptor::new("grid", "/grid"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(feeds.attempts(), 1);

        registry.disconnect("grid");
        registry.connect_feed(FeedDescriptor::new("grid", "/grid"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(feeds.attempts(), 1);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(feeds.attempts(), 2);
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_disabled() {
        let (registry, _, channels) = registry(StreamingConfig::default());
        let connection =
            registry.connect_channel(ChannelDescriptor::consultation("1", "ws://localhost/ws"));
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(connection.status(), ConnectionStatus::Disconnected);
        assert_eq!(channels.attempts(), 0);
        assert!(!registry.send_channel_message(
            "consultation-1",
            ChannelMessage::new(ChannelMessageType::Ping, json!({}))
        ));
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_channel_message() {
        let (registry, _, channels) = registry(live_config());
        channels.push(LinkScript::Accept);

        assert!(!registry.send_channel_message(
            "consultation-1",
            ChannelMessage::new(ChannelMessageType::Ping, json!({}))
        ));

        let connection =
            registry.connect_channel(ChannelDescriptor::consultation("1", "ws://localhost/ws"));
        connection
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        assert!(registry.send_channel_message(
            "consultation-1",
            ChannelMessage::new(ChannelMessageType::TypingIndicator, json!({"isTyping": true}))
        ));
        tokio::time::sleep(Duration::from_millis(1)).await;

        let sent = channels.remote(0).unwrap().sent_messages();
        assert!(sent
            .iter()
            .any(|m| m.kind == ChannelMessageType::TypingIndicator));
        assert_eq!(
            registry.connection_status("consultation-1"),
            Some(ConnectionStatus::Connected)
        );
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_leave_releases_channel() {
        let (registry, _, channels) = registry(live_config());
        channels.push(LinkScript::Accept);

        let room = registry.open_consultation(
            ChannelDescriptor::consultation("9", "ws://localhost/ws"),
            "dr-lee",
        );
        room.connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        assert_eq!(room.consultation_id(), "9");
        tokio::time::sleep(Duration::from_millis(1)).await;
        let join = &channels.remote(0).unwrap().sent_messages()[0];
        assert_eq!(join.kind, ChannelMessageType::JoinConsultation);
        assert_eq!(join.sender_id.as_deref(), Some("dr-lee"));

        room.leave();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(registry.channel_connection("consultation-9").is_none());
        let remote = channels.remote(0).unwrap();
        assert!(remote.is_closed());
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_config() {
        let (registry, _, _) = registry(StreamingConfig::default());
        registry
            .update_config(|c| c.fallback_interval_ms = 1000)
            .unwrap();
        assert_eq!(registry.config().fallback_interval_ms, 1000);

        let err = registry
            .update_config(|c| c.backoff_base_ms = c.backoff_cap_ms + 1)
            .unwrap_err();
        assert!(matches!(err, StreamError::ConfigValidation { .. }));
        assert_eq!(registry.config().backoff_base_ms, 1000);
        registry.shutdown().await;
    }
}
