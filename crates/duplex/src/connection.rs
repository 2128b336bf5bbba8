//! DuplexChannelConnection - one bidirectional consultation channel
//!
//! Like feeds, each channel is an actor task and the single writer of its
//! `ChannelConnectionInfo`. Outbound messages reach the task through a
//! bounded queue.
//!
//! Lifecycle:
//! ```text
//! connecting ──open──> connected ──peer close──> disconnected
//!     │                    │
//!     │                    └──socket error / stale heartbeat──┐
//!     └──connect failure / timeout────────────────────────────┤
//!                                                             v
//!                   error ──budget left──> (backoff) ──> connecting
//!                     └──budget spent──> disconnected
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{
    ChannelConnectionInfo, ChannelConnector, ChannelDescriptor, ChannelEvent, ChannelLink,
    ChannelMessage, ChannelMessageType, ConnectionStatus, DisconnectReason, FailureKind,
    StreamError, StreamingConfig, MAX_TIMER_INTERVAL,
};
use dispatcher::ChannelDispatcher;
use serde_json::json;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::BackoffPolicy;
use crate::heartbeat::HeartbeatMonitor;
use crate::metrics::ChannelMetrics;
use crate::participants::ParticipantSet;

/// Sender id stamped on messages the connection itself produces
pub const SYSTEM_SENDER_ID: &str = "system";

/// Upper bound for the best-effort leave message on intentional close
const LEAVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Collaborators shared by every channel connection of a registry
#[derive(Clone)]
pub struct ChannelContext {
    pub dispatcher: ChannelDispatcher,
    pub metrics: Arc<ChannelMetrics>,
}

/// Settings captured when the channel is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub backoff: BackoffPolicy,
    /// Outbound queue depth
    pub queue_capacity: usize,
    /// Sender id for join/leave messages
    pub sender_id: String,
}

impl ChannelOptions {
    pub fn from_config(config: &StreamingConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            backoff: BackoffPolicy::from_config(config),
            queue_capacity: config.channel_queue_capacity,
            sender_id: SYSTEM_SENDER_ID.to_string(),
        }
    }

    pub fn with_sender_id(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }
}

/// View of a channel connection; clones share the same channel
#[derive(Debug, Clone)]
pub struct ChannelConnection {
    id: Arc<str>,
    channel_name: Arc<str>,
    status: watch::Receiver<ChannelConnectionInfo>,
    participants: watch::Receiver<Vec<String>>,
    outbound: mpsc::Sender<ChannelMessage>,
}

impl ChannelConnection {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn channel_name(&self) -> &str {
        &self.channel_name
    }

    pub fn info(&self) -> ChannelConnectionInfo {
        self.status.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Current participants in join order
    pub fn participants(&self) -> Vec<String> {
        self.participants.borrow().clone()
    }

    /// Wait until the snapshot satisfies `predicate`
    ///
    /// Returns the last known snapshot if the channel task ends first.
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&ChannelConnectionInfo) -> bool,
    ) -> ChannelConnectionInfo {
        let mut rx = self.status.clone();
        let result = rx.wait_for(predicate).await.map(|info| info.clone());
        match result {
            Ok(info) => info,
            Err(_) => rx.borrow().clone(),
        }
    }

    /// Queue `message` for the peer
    ///
    /// Rejected (logged, returns `false`) unless the channel is connected.
    /// A missing timestamp is backfilled with the current time.
    pub fn send(&self, mut message: ChannelMessage) -> bool {
        let status = self.status();
        if status != ConnectionStatus::Connected {
            warn!(
                channel = %self.channel_name,
                status = status.as_str(),
                kind = %message.kind,
                "Channel not connected, message dropped"
            );
            return false;
        }
        if message.timestamp.is_none() {
            message.timestamp = Some(Utc::now());
        }

        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(message)) => {
                ::metrics::counter!("channel_queue_full_total", "channel" => self.channel_name.to_string())
                    .increment(1);
                warn!(
                    channel = %self.channel_name,
                    kind = %message.kind,
                    "Outbound queue full, message dropped"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(channel = %self.channel_name, "Channel task has ended, message dropped");
                false
            }
        }
    }
}

/// Handle to a running channel task
pub struct ChannelHandle {
    connection: ChannelConnection,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    /// Create the channel and spawn its task
    pub fn spawn<C>(
        id: impl Into<String>,
        descriptor: ChannelDescriptor,
        connector: Arc<C>,
        options: ChannelOptions,
        ctx: ChannelContext,
    ) -> Self
    where
        C: ChannelConnector + Sync + 'static,
    {
        let id = id.into();
        let (status_tx, status_rx) = watch::channel(ChannelConnectionInfo::connecting(
            &id,
            &descriptor.channel_name,
        ));
        let (participants_tx, participants_rx) = watch::channel(Vec::new());
        let (outbound_tx, outbound_rx) = mpsc::channel(options.queue_capacity.max(1));
        let cancel = CancellationToken::new();

        let connection = ChannelConnection {
            id: id.as_str().into(),
            channel_name: descriptor.channel_name.as_str().into(),
            status: status_rx,
            participants: participants_rx,
            outbound: outbound_tx,
        };

        let actor = ChannelActor {
            id,
            descriptor,
            connector,
            options,
            ctx,
            status: status_tx,
            participants: ParticipantSet::new(),
            participants_tx,
            outbound: outbound_rx,
            cancel: cancel.clone(),
            last_receipt: None,
        };
        let task = tokio::spawn(actor.run());

        Self {
            connection,
            cancel,
            task: Some(task),
        }
    }

    /// A channel that never connects (channels disabled by configuration)
    pub fn disabled(id: impl Into<String>, channel_name: &str) -> Self {
        let id = id.into();
        let mut info = ChannelConnectionInfo::connecting(&id, channel_name);
        info.status = ConnectionStatus::Disconnected;
        let (_status_tx, status_rx) = watch::channel(info);
        let (_participants_tx, participants_rx) = watch::channel(Vec::new());
        let (outbound_tx, _outbound_rx) = mpsc::channel(1);

        Self {
            connection: ChannelConnection {
                id: id.into(),
                channel_name: channel_name.into(),
                status: status_rx,
                participants: participants_rx,
                outbound: outbound_tx,
            },
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn connection(&self) -> &ChannelConnection {
        &self.connection
    }

    /// Stop the task; idempotent
    ///
    /// An open link gets a best-effort leave message before it is closed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel and wait for the task to finish
    #[instrument(name = "channel_handle_shutdown", skip(self), fields(channel = %self.connection.channel_name))]
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                error!(error = ?e, "Channel task panicked");
            }
        }
    }
}

enum SessionEnd {
    /// Intentional close
    Cancelled,
    /// Peer closed cleanly; no reconnect
    Closed,
    /// Recoverable failure; reconnect within the backoff budget
    Failed(StreamError),
}

struct ChannelActor<C: ChannelConnector> {
    id: String,
    descriptor: ChannelDescriptor,
    connector: Arc<C>,
    options: ChannelOptions,
    ctx: ChannelContext,
    status: watch::Sender<ChannelConnectionInfo>,
    participants: ParticipantSet,
    participants_tx: watch::Sender<Vec<String>>,
    outbound: mpsc::Receiver<ChannelMessage>,
    cancel: CancellationToken,
    last_receipt: Option<DateTime<Utc>>,
}

impl<C> ChannelActor<C>
where
    C: ChannelConnector + Sync + 'static,
{
    #[instrument(
        name = "channel_connection",
        skip(self),
        fields(channel = %self.descriptor.channel_name)
    )]
    async fn run(mut self) {
        // consecutive failures since the last successful open
        let mut failures: u32 = 0;

        loop {
            let end = match self.open(failures).await {
                Ok(Some(mut link)) => {
                    failures = 0;
                    let end = self.session(&mut link).await;
                    if matches!(end, SessionEnd::Cancelled) {
                        self.leave(&mut link).await;
                    }
                    link.close().await;
                    end
                }
                Ok(None) => SessionEnd::Cancelled,
                Err(e) => SessionEnd::Failed(e),
            };

            match end {
                SessionEnd::Cancelled => {
                    debug!("Channel connection cancelled");
                    break;
                }
                SessionEnd::Closed => {
                    info!("Peer closed the channel");
                    self.update(|info| info.status = ConnectionStatus::Disconnected);
                    self.emit(ChannelEvent::Disconnected {
                        reason: DisconnectReason::Closed,
                    });
                    break;
                }
                SessionEnd::Failed(err) => {
                    failures += 1;
                    if !self.recover(err, failures).await {
                        break;
                    }
                }
            }
        }

        self.update(|info| info.status = ConnectionStatus::Disconnected);
    }

    /// Connect with the stored descriptor; `Ok(None)` when cancelled
    async fn open(&mut self, attempt: u32) -> Result<Option<C::Link>, StreamError> {
        if attempt > 0 {
            self.update(|info| info.status = ConnectionStatus::Connecting);
        }
        self.ctx
            .metrics
            .record_attempt(&self.descriptor.channel_name);
        self.emit(ChannelEvent::Connecting { attempt });

        let connect = tokio::time::timeout(
            self.options.connect_timeout,
            self.connector.connect(&self.descriptor),
        );
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(None),
            result = connect => result,
        };

        let mut link = match result {
            Err(_) => {
                return Err(StreamError::transport(
                    &self.descriptor.channel_name,
                    format!(
                        "connect timed out after {}ms",
                        self.options.connect_timeout.as_millis()
                    ),
                ))
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(link)) => link,
        };

        if self.cancel.is_cancelled() {
            link.close().await;
            return Ok(None);
        }

        let now = Utc::now();
        self.update(|info| {
            info.status = ConnectionStatus::Connected;
            info.reconnect_count = 0;
            info.last_heartbeat = now;
        });
        info!("Channel connected");
        self.emit(ChannelEvent::Connected {
            connection_id: self.id.clone(),
        });

        if let Some(scope) = self.descriptor.scope_id.clone() {
            let join = self.scope_message(ChannelMessageType::JoinConsultation, &scope);
            if let Err(e) = self.write(&mut link, &join).await {
                link.close().await;
                return Err(e);
            }
            debug!(consultation = %scope, "Joined consultation");
        }

        Ok(Some(link))
    }

    async fn session(&mut self, link: &mut C::Link) -> SessionEnd {
        let period = self
            .options
            .heartbeat_interval
            .clamp(Duration::from_millis(1), MAX_TIMER_INTERVAL);
        let mut monitor = HeartbeatMonitor::new(period, Instant::now());
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                frame = link.recv() => match frame {
                    None => return SessionEnd::Closed,
                    // an undecodable frame is dropped, the link stays up
                    Some(Err(e @ StreamError::Protocol { .. })) => {
                        monitor.observe(Instant::now());
                        self.reject_frame(e);
                    }
                    Some(Err(e)) => return SessionEnd::Failed(e),
                    Some(Ok(raw)) => {
                        monitor.observe(Instant::now());
                        self.on_frame(&raw);
                    }
                },
                _ = ticker.tick() => {
                    let now = Instant::now();
                    if monitor.is_stale(now) {
                        self.ctx.metrics.record_stale(&self.descriptor.channel_name);
                        return SessionEnd::Failed(StreamError::StaleConnection {
                            name: self.descriptor.channel_name.clone(),
                            silent_ms: monitor.silent_for(now).as_millis() as u64,
                        });
                    }
                    if let Err(e) = self.write(link, &ChannelMessage::ping()).await {
                        return SessionEnd::Failed(e);
                    }
                }
                Some(message) = self.outbound.recv() => {
                    if let Err(e) = self.write(link, &message).await {
                        self.ctx
                            .metrics
                            .record_send_failure(&self.descriptor.channel_name);
                        warn!(error = %e, kind = %message.kind, "Send failed");
                        self.emit(ChannelEvent::SendError {
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    fn on_frame(&mut self, raw: &str) {
        self.ctx.metrics.record_received();
        let received_at = self.receipt_time();
        self.update(|info| info.last_heartbeat = received_at);

        let mut message: ChannelMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                self.reject_frame(StreamError::protocol(
                    &self.descriptor.channel_name,
                    e.to_string(),
                ));
                return;
            }
        };
        message.timestamp = Some(received_at);

        if message.kind.is_control() {
            if self.participants.apply(&message) {
                self.publish_participants();
            }
            return;
        }
        self.emit(ChannelEvent::Message(message));
    }

    fn reject_frame(&self, err: StreamError) {
        warn!(error = %err, "Dropping malformed channel message");
        self.emit(ChannelEvent::Error {
            kind: FailureKind::Protocol,
            message: err.to_string(),
        });
    }

    /// Error handling after a failed open or session
    ///
    /// Returns `false` when the channel is done (budget spent or cancelled).
    async fn recover(&mut self, err: StreamError, attempt: u32) -> bool {
        warn!(error = %err, attempt, "Channel failed");
        self.update(|info| info.status = ConnectionStatus::Error);
        self.emit(ChannelEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
        if !self.participants.is_empty() {
            self.participants.clear();
            self.publish_participants();
        }

        let Some(delay) = self.options.backoff.delay_for(attempt) else {
            error!(
                max_attempts = self.options.backoff.max_attempts,
                "Reconnect attempts exhausted, giving up"
            );
            self.ctx
                .metrics
                .record_abandoned(&self.descriptor.channel_name);
            self.update(|info| info.status = ConnectionStatus::Disconnected);
            self.emit(ChannelEvent::Disconnected {
                reason: DisconnectReason::Abandoned,
            });
            return false;
        };

        self.update(|info| info.reconnect_count = attempt);
        self.ctx
            .metrics
            .record_reconnect(&self.descriptor.channel_name);
        info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        self.emit(ChannelEvent::ReconnectScheduled { attempt, delay });

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Best-effort leave on intentional close
    async fn leave(&self, link: &mut C::Link) {
        let Some(scope) = self.descriptor.scope_id.as_deref() else {
            return;
        };
        let leave = self.scope_message(ChannelMessageType::LeaveConsultation, scope);
        match tokio::time::timeout(LEAVE_TIMEOUT, self.write(link, &leave)).await {
            Ok(Ok(())) => debug!(consultation = scope, "Left consultation"),
            Ok(Err(e)) => debug!(error = %e, "Leave message not delivered"),
            Err(_) => debug!("Leave message timed out"),
        }
    }

    async fn write(&self, link: &mut C::Link, message: &ChannelMessage) -> Result<(), StreamError> {
        let frame = serde_json::to_string(message)
            .map_err(|e| StreamError::protocol(&self.descriptor.channel_name, e.to_string()))?;
        link.send(frame).await?;
        self.ctx.metrics.record_sent();
        Ok(())
    }

    fn scope_message(&self, kind: ChannelMessageType, scope: &str) -> ChannelMessage {
        let mut message = ChannelMessage::new(kind, json!({ "consultationId": scope }))
            .with_sender(self.options.sender_id.as_str())
            .with_scope(scope);
        message.timestamp = Some(Utc::now());
        message
    }

    /// Receipt timestamps never go backwards, even if the wall clock does
    fn receipt_time(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let stamp = match self.last_receipt {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        self.last_receipt = Some(stamp);
        stamp
    }

    fn publish_participants(&self) {
        let ids = self.participants.ids().to_vec();
        self.participants_tx.send_replace(ids.clone());
        self.emit(ChannelEvent::ParticipantsChanged(ids));
    }

    fn emit(&self, event: ChannelEvent) {
        if self.cancel.is_cancelled() {
            debug!(event = event.kind(), "Discarding event after cancel");
            return;
        }
        self.ctx
            .dispatcher
            .dispatch(&self.descriptor.channel_name, &event);
    }

    fn update(&self, modify: impl FnOnce(&mut ChannelConnectionInfo)) {
        self.status.send_modify(modify);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{LinkScript, MockChannelConnector};
    use parking_lot::Mutex;

    struct Harness {
        ctx: ChannelContext,
        events: Arc<Mutex<Vec<ChannelEvent>>>,
        _sub: dispatcher::Subscription,
    }

    fn harness(channel: &str) -> Harness {
        let ctx = ChannelContext {
            dispatcher: ChannelDispatcher::new("channel"),
            metrics: Arc::new(ChannelMetrics::new()),
        };
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let sub = ctx.dispatcher.subscribe(
            channel,
            Arc::new(move |e: &ChannelEvent| sink.lock().push(e.clone())),
        );
        Harness {
            ctx,
            events,
            _sub: sub,
        }
    }

    fn options() -> ChannelOptions {
        ChannelOptions {
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            backoff: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(30), 3),
            queue_capacity: 8,
            sender_id: SYSTEM_SENDER_ID.to_string(),
        }
    }

    fn kinds(events: &Mutex<Vec<ChannelEvent>>) -> Vec<&'static str> {
        events.lock().iter().map(ChannelEvent::kind).collect()
    }

    fn spawn(h: &Harness, connector: &Arc<MockChannelConnector>, options: ChannelOptions) -> ChannelHandle {
        ChannelHandle::spawn(
            "consultation-42-1",
            ChannelDescriptor::consultation("42", "ws://localhost/ws"),
            Arc::clone(connector),
            options,
            h.ctx.clone(),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_on_open_and_message_routing() {
        let h = harness("consultation-42");
        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Accept);

        let handle = spawn(&h, &connector, options());
        handle
            .connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        settle().await;

        let remote = connector.remote(0).unwrap();
        let sent = remote.sent_messages();
        assert_eq!(sent[0].kind, ChannelMessageType::JoinConsultation);
        assert_eq!(sent[0].payload["consultationId"], "42");
        assert_eq!(sent[0].sender_id.as_deref(), Some(SYSTEM_SENDER_ID));

        remote.push_raw(r#"{"type":"participant_joined","payload":{},"senderId":"alice"}"#);
        remote.push_raw(r#"{"type":"consultation_message","payload":{"content":"hi"},"senderId":"alice"}"#);
        settle().await;

        assert_eq!(kinds(&h.events), ["connecting", "connected", "participants", "message"]);
        assert_eq!(handle.connection().participants(), vec!["alice".to_string()]);
        match &h.events.lock()[3] {
            ChannelEvent::Message(msg) => {
                assert_eq!(msg.payload["content"], "hi");
                assert!(msg.timestamp.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_traffic_keeps_heartbeat_fresh() {
        let h = harness("consultation-42");
        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Accept);

        let handle = spawn(&h, &connector, options());
        handle
            .connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        let remote = connector.remote(0).unwrap();

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            remote.push_raw(r#"{"type":"ping","payload":{}}"#);
        }
        tokio::time::sleep(Duration::from_secs(20)).await;

        let info = handle.connection().info();
        assert_eq!(info.status, ConnectionStatus::Connected);
        assert_eq!(info.reconnect_count, 0);
        assert!(!kinds(&h.events).contains(&"error"));
        assert_eq!(connector.attempts(), 1);
        // outbound keep-alives at 15s intervals
        let pings = remote
            .sent_messages()
            .iter()
            .filter(|m| m.kind == ChannelMessageType::Ping)
            .count();
        assert_eq!(pings, 4);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_link_reconnects() {
        let h = harness("consultation-42");
        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Accept);
        connector.push(LinkScript::Accept);

        let handle = spawn(
            &h,
            &connector,
            ChannelOptions {
                heartbeat_interval: Duration::from_secs(1),
                ..options()
            },
        );
        // stale at 4s, reconnect after the 1s base delay
        tokio::time::sleep(Duration::from_millis(5500)).await;

        assert_eq!(
            kinds(&h.events),
            ["connecting", "connected", "error", "reconnect_scheduled", "connecting", "connected"]
        );
        match &h.events.lock()[2] {
            ChannelEvent::Error { kind, .. } => assert_eq!(*kind, FailureKind::StaleConnection),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(handle.connection().info().reconnect_count, 0);
        assert_eq!(h.ctx.metrics.snapshot().stale_heartbeats, 1);
        // re-join with the same scope after reconnecting
        let rejoin = connector.remote(1).unwrap().sent_messages();
        assert_eq!(rejoin[0].kind, ChannelMessageType::JoinConsultation);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_socket_error_backs_off_then_gives_up() {
        let h = harness("consultation-42");
        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Accept);
        for _ in 0..3 {
            connector.push(LinkScript::Refuse("connection refused".into()));
        }

        let handle = spawn(&h, &connector, options());
        handle
            .connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        connector.remote(0).unwrap().fail("connection reset");

        let info = handle
            .connection()
            .wait_until(|i| i.status == ConnectionStatus::Disconnected)
            .await;
        assert_eq!(info.reconnect_count, 3);

        let delays: Vec<(u32, Duration)> = h
            .events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ChannelEvent::ReconnectScheduled { attempt, delay } => Some((*attempt, *delay)),
                _ => None,
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                (1, Duration::from_secs(1)),
                (2, Duration::from_secs(2)),
                (3, Duration::from_secs(4)),
            ]
        );
        assert_eq!(connector.attempts(), 4);
        assert!(matches!(
            h.events.lock().last(),
            Some(ChannelEvent::Disconnected {
                reason: DisconnectReason::Abandoned
            })
        ));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 4);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_close_does_not_reconnect() {
        let h = harness("consultation-42");
        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Accept);

        let handle = spawn(&h, &connector, options());
        handle
            .connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        connector.remote(0).unwrap().close();
        settle().await;

        assert_eq!(handle.connection().status(), ConnectionStatus::Disconnected);
        assert_eq!(kinds(&h.events).last(), Some(&"disconnected"));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_keeps_session() {
        let h = harness("consultation-42");
        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Accept);

        let handle = spawn(&h, &connector, options());
        handle
            .connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        connector.remote(0).unwrap().push_raw("{not json");
        settle().await;

        assert_eq!(kinds(&h.events), ["connecting", "connected", "error"]);
        assert_eq!(handle.connection().status(), ConnectionStatus::Connected);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_frame_keeps_session() {
        let h = harness("consultation-42");
        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Accept);

        let handle = spawn(&h, &connector, options());
        handle
            .connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        let remote = connector.remote(0).unwrap();
        remote.push_malformed("binary frame is not UTF-8");
        remote.push_raw(r#"{"type":"consultation_update","payload":{"step":2}}"#);
        settle().await;

        assert_eq!(kinds(&h.events), ["connecting", "connected", "error", "message"]);
        assert!(matches!(
            h.events.lock()[2],
            ChannelEvent::Error { kind: FailureKind::Protocol, .. }
        ));
        assert_eq!(handle.connection().status(), ConnectionStatus::Connected);
        assert_eq!(connector.attempts(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_epoch_timestamp_message_delivered() {
        let h = harness("consultation-42");
        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Accept);

        let handle = spawn(&h, &connector, options());
        handle
            .connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        connector.remote(0).unwrap().push_raw(
            r#"{"type":"consultation_message","payload":{"content":"hi"},"timestamp":1700000000000}"#,
        );
        settle().await;

        assert_eq!(kinds(&h.events), ["connecting", "connected", "message"]);
        match &h.events.lock()[2] {
            ChannelEvent::Message(msg) => {
                assert_eq!(msg.payload["content"], "hi");
                // receipt time replaces the peer's stamp
                let stamp = msg.timestamp.unwrap();
                assert!(stamp.timestamp_millis() > 1_700_000_000_000);
            }
            other => panic!("unexpected event {other:?}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_heartbeat_interval_does_not_panic() {
        let h = harness("consultation-42");
        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Accept);

        let mut opts = options();
        opts.heartbeat_interval = Duration::MAX;
        let handle = spawn(&h, &connector, opts);
        handle
            .connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(handle.connection().status(), ConnectionStatus::Connected);
        assert!(!handle.is_finished());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_connected() {
        let h = harness("consultation-42");
        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Hang);

        let handle = spawn(&h, &connector, options());
        settle().await;
        let msg = ChannelMessage::new(ChannelMessageType::TypingIndicator, json!({"isTyping": true}));
        assert!(!handle.connection().send(msg));
        handle.shutdown().await;

        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Accept);
        let handle = spawn(&h, &connector, options());
        handle
            .connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        let msg = ChannelMessage::new(ChannelMessageType::TypingIndicator, json!({"isTyping": true}));
        assert!(handle.connection().send(msg));
        settle().await;

        let sent = connector.remote(0).unwrap().sent_messages();
        let typing = sent
            .iter()
            .find(|m| m.kind == ChannelMessageType::TypingIndicator)
            .unwrap();
        assert!(typing.timestamp.is_some());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_intentional_close_leaves_scope_silently() {
        let h = harness("consultation-42");
        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Accept);

        let handle = spawn(&h, &connector, options());
        handle
            .connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        let connection = handle.connection().clone();
        handle.shutdown().await;

        let remote = connector.remote(0).unwrap();
        let sent = remote.sent_messages();
        assert_eq!(sent.last().unwrap().kind, ChannelMessageType::LeaveConsultation);
        assert!(remote.is_closed());
        assert_eq!(connection.status(), ConnectionStatus::Disconnected);
        assert_eq!(kinds(&h.events), ["connecting", "connected"]);
    }

    #[tokio::test]
    async fn test_disabled_handle() {
        let handle = ChannelHandle::disabled("c-1", "consultation-9");
        assert_eq!(handle.connection().status(), ConnectionStatus::Disconnected);
        assert!(handle.is_finished());
        assert!(!handle
            .connection()
            .send(ChannelMessage::new(ChannelMessageType::Ping, json!({}))));
        handle.shutdown().await;
    }
}
