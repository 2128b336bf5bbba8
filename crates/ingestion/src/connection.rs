//! PushStreamConnection - one named one-way feed
//!
//! Each feed runs as its own task and is the single writer of its
//! `FeedConnectionInfo`; everyone else observes it through a watch channel.
//!
//! Lifecycle:
//! ```text
//! connecting ──open──> connected ──no data / error field / close──> disconnected ─┐
//!     │                    └──transport failure──> error ──> disconnected ────────┤
//!     └──connect timeout──> disconnected ─────────────────────────────────────────┤
//!                                                                                 v
//!                                                  fallback (connected, synthetic)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use contracts::{
    ConnectionStatus, DisconnectReason, FeedConnectionInfo, FeedConnector, FeedDescriptor,
    FeedEvent, FeedMode, FeedPoint, FeedStream, LiveIndicator, StreamError, StreamingConfig,
};
use dispatcher::FeedDispatcher;
use feed_cache::DataCache;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapter::{adapter_for, DecodedFrame, FeedAdapter};
use crate::fallback::{FallbackSource, SyntheticGenerator};
use crate::metrics::FeedMetrics;

/// Collaborators shared by every feed connection of a registry
#[derive(Clone)]
pub struct FeedContext {
    pub dispatcher: FeedDispatcher,
    pub cache: Arc<DataCache>,
    pub generator: Arc<dyn SyntheticGenerator>,
    pub metrics: Arc<FeedMetrics>,
}

/// Settings captured when the connection is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedOptions {
    pub enable_live: bool,
    pub fallback_enabled: bool,
    pub connect_timeout: Duration,
    pub fallback_interval: Duration,
    /// Delay before the live attempt (rate limiting)
    pub start_delay: Duration,
}

impl FeedOptions {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            enable_live: config.enable_live_feed,
            fallback_enabled: config.fallback_enabled,
            connect_timeout: config.connect_timeout(),
            fallback_interval: config.fallback_interval(),
            start_delay: Duration::ZERO,
        }
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }
}

/// Read-only view of a feed connection
///
/// Cheap to clone; every clone observes the same connection.
#[derive(Debug, Clone)]
pub struct FeedConnection {
    id: Arc<str>,
    feed_name: Arc<str>,
    status: watch::Receiver<FeedConnectionInfo>,
}

impl FeedConnection {
    /// Connection identity, stable for the lifetime of the registry entry
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn feed_name(&self) -> &str {
        &self.feed_name
    }

    /// Current snapshot
    pub fn info(&self) -> FeedConnectionInfo {
        self.status.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().status
    }

    pub fn mode(&self) -> FeedMode {
        self.status.borrow().mode
    }

    pub fn indicator(&self) -> LiveIndicator {
        self.status.borrow().indicator()
    }

    /// Wait until the snapshot satisfies `predicate`
    ///
    /// Returns the last known snapshot if the connection task ends first.
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&FeedConnectionInfo) -> bool,
    ) -> FeedConnectionInfo {
        let mut rx = self.status.clone();
        let result = rx.wait_for(predicate).await.map(|info| info.clone());
        match result {
            Ok(info) => info,
            Err(_) => rx.borrow().clone(),
        }
    }
}

/// Handle to a running feed connection task
pub struct FeedHandle {
    connection: FeedConnection,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl FeedHandle {
    /// Create the connection and spawn its task
    ///
    /// The task starts in `connecting`, attempts the live link (unless live
    /// feeds are disabled) and substitutes a fallback source on failure.
    pub fn spawn<F>(
        id: impl Into<String>,
        descriptor: FeedDescriptor,
        connector: Arc<F>,
        options: FeedOptions,
        ctx: FeedContext,
    ) -> Self
    where
        F: FeedConnector + Sync + 'static,
    {
        let id = id.into();
        let (status_tx, status_rx) =
            watch::channel(FeedConnectionInfo::connecting(&id, &descriptor.feed_name));
        let cancel = CancellationToken::new();

        let connection = FeedConnection {
            id: id.into(),
            feed_name: descriptor.feed_name.as_str().into(),
            status: status_rx,
        };

        let actor = FeedActor {
            adapter: adapter_for(descriptor.adapter),
            descriptor,
            connector,
            options,
            ctx,
            status: status_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(actor.run());

        Self {
            connection,
            cancel,
            task,
        }
    }

    pub fn connection(&self) -> &FeedConnection {
        &self.connection
    }

    /// Stop the task; idempotent
    ///
    /// Pending timers and in-flight connect attempts are dropped, and
    /// nothing is dispatched for this connection afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the task to finish
    #[instrument(name = "feed_handle_shutdown", skip(self), fields(feed = %self.connection.feed_name))]
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(error = ?e, "Feed task panicked");
        }
    }
}

enum LiveOutcome {
    /// Orderly end of the live phase
    Ended(DisconnectReason),
    /// Transport failure
    Failed(StreamError),
}

struct FeedActor<F> {
    descriptor: FeedDescriptor,
    connector: Arc<F>,
    adapter: Arc<dyn FeedAdapter>,
    options: FeedOptions,
    ctx: FeedContext,
    status: watch::Sender<FeedConnectionInfo>,
    cancel: CancellationToken,
}

impl<F> FeedActor<F>
where
    F: FeedConnector + Sync + 'static,
{
    #[instrument(
        name = "feed_connection",
        skip(self),
        fields(feed = %self.descriptor.feed_name, adapter = self.adapter.name())
    )]
    async fn run(mut self) {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Feed connection cancelled");
            }
            _ = self.drive() => {}
        }
        self.update(|info| {
            info.status = ConnectionStatus::Disconnected;
            info.last_update = Utc::now();
        });
    }

    async fn drive(&mut self) {
        if !self.options.start_delay.is_zero() {
            debug!(
                delay_ms = self.options.start_delay.as_millis() as u64,
                "Rate limited, delaying live attempt"
            );
            tokio::time::sleep(self.options.start_delay).await;
        }

        if self.options.enable_live {
            let outcome = self.live().await;
            self.finish_live(outcome);
        } else {
            info!("Live feeds disabled");
        }

        if self.options.fallback_enabled {
            self.engage_fallback().await;
        } else {
            warn!("Fallback disabled, feed stays disconnected");
            self.update(|info| info.status = ConnectionStatus::Disconnected);
        }
    }

    async fn live(&mut self) -> LiveOutcome {
        self.ctx.metrics.record_attempt(&self.descriptor.feed_name);
        let connection_id = self.status.borrow().id.clone();
        self.emit(FeedEvent::Connecting { connection_id });

        let connect = self.connector.connect(&self.descriptor);
        let mut stream = match tokio::time::timeout(self.options.connect_timeout, connect).await {
            Err(_) => {
                warn!(
                    timeout_ms = self.options.connect_timeout.as_millis() as u64,
                    "Connect timed out"
                );
                return LiveOutcome::Ended(DisconnectReason::Timeout);
            }
            Ok(Err(e)) => return LiveOutcome::Failed(e),
            Ok(Ok(stream)) => stream,
        };

        // Stale-callback guard: an attempt completing after cancel is discarded
        if self.cancel.is_cancelled() {
            stream.close().await;
            return LiveOutcome::Ended(DisconnectReason::Requested);
        }

        self.update(|info| {
            info.status = ConnectionStatus::Connected;
            info.mode = FeedMode::Live;
            info.error_count = 0;
            info.retry_count = 0;
            info.last_update = Utc::now();
        });
        info!("Live feed connected");
        self.emit(FeedEvent::Connected(self.snapshot()));

        let outcome = self.pump(&mut stream).await;
        stream.close().await;
        outcome
    }

    async fn pump(&mut self, stream: &mut F::Stream) -> LiveOutcome {
        loop {
            let frame = match stream.next_frame().await {
                None => {
                    info!("Upstream closed the stream");
                    return LiveOutcome::Ended(DisconnectReason::Closed);
                }
                Some(Err(e)) => return LiveOutcome::Failed(e),
                Some(Ok(frame)) => frame,
            };

            match self.adapter.decode(&self.descriptor.feed_name, &frame) {
                Ok(DecodedFrame::Point(point)) => self.publish(point, false),
                Ok(DecodedFrame::NoData(message)) => {
                    warn!(%message, "Upstream has no data");
                    return LiveOutcome::Ended(DisconnectReason::NoData);
                }
                Ok(DecodedFrame::UpstreamError(message)) => {
                    warn!(%message, "Upstream reported an error");
                    return LiveOutcome::Ended(DisconnectReason::UpstreamError);
                }
                Err(e) => {
                    self.ctx
                        .metrics
                        .record_protocol_error(&self.descriptor.feed_name);
                    self.update(|info| info.error_count += 1);
                    warn!(error = %e, "Dropping malformed frame");
                    self.emit(FeedEvent::DataError {
                        kind: e.kind(),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    fn finish_live(&mut self, outcome: LiveOutcome) {
        match outcome {
            LiveOutcome::Ended(reason) => {
                self.update(|info| {
                    info.status = ConnectionStatus::Disconnected;
                    if reason == DisconnectReason::Timeout {
                        info.retry_count += 1;
                    }
                    info.last_update = Utc::now();
                });
                self.emit(FeedEvent::Disconnected { reason });
            }
            LiveOutcome::Failed(err) => {
                warn!(error = %err, "Live feed failed");
                self.update(|info| {
                    info.status = ConnectionStatus::Error;
                    info.error_count += 1;
                    info.retry_count += 1;
                    info.last_update = Utc::now();
                });
                self.emit(FeedEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                });
                self.update(|info| info.status = ConnectionStatus::Disconnected);
                self.emit(FeedEvent::Disconnected {
                    reason: DisconnectReason::Transport,
                });
            }
        }
    }

    /// Substitute synthetic data on the same dispatch path; runs until cancelled
    async fn engage_fallback(&mut self) {
        let mut source = FallbackSource::new(
            self.descriptor.feed_name.as_str(),
            Arc::clone(&self.ctx.generator),
            self.options.fallback_interval,
        );

        self.update(|info| {
            info.status = ConnectionStatus::Connected;
            info.mode = FeedMode::Fallback;
            info.last_update = Utc::now();
        });
        self.ctx.metrics.record_fallback(&self.descriptor.feed_name);
        info!(
            interval_ms = source.interval().as_millis() as u64,
            "Fallback source engaged"
        );
        self.emit(FeedEvent::Fallback(self.snapshot()));

        let mut ticker = tokio::time::interval(source.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let point = source.next_point(Utc::now());
            self.publish(point, true);
        }
    }

    fn publish(&self, point: FeedPoint, synthetic: bool) {
        if self.cancel.is_cancelled() {
            return;
        }
        let point = Arc::new(point);
        self.ctx.cache.push(Arc::clone(&point));
        self.ctx
            .metrics
            .record_point(&self.descriptor.feed_name, synthetic);
        self.update(|info| info.last_update = Utc::now());
        self.emit(FeedEvent::Data(point));
    }

    fn emit(&self, event: FeedEvent) {
        if self.cancel.is_cancelled() {
            debug!(event = event.kind(), "Discarding event after cancel");
            return;
        }
        self.ctx
            .dispatcher
            .dispatch(&self.descriptor.feed_name, &event);
    }

    fn update(&self, modify: impl FnOnce(&mut FeedConnectionInfo)) {
        self.status.send_modify(modify);
    }

    fn snapshot(&self) -> FeedConnectionInfo {
        self.status.borrow().clone()
    }
}
