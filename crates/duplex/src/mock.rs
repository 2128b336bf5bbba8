//! Mock channel transport
//!
//! 每次 `connect` 消费一个脚本；接受的连接会生成一个 [`MockRemote`]，
//! 测试通过它模拟对端：推送消息、制造错误、关闭连接、检查已发送的帧。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use contracts::{ChannelConnector, ChannelDescriptor, ChannelLink, ChannelMessage, StreamError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// Behaviour of a single connect attempt
#[derive(Debug, Clone)]
pub enum LinkScript {
    /// Open a link backed by a new [`MockRemote`]
    Accept,
    /// Fail with a transport error
    Refuse(String),
    /// Never complete
    Hang,
}

#[derive(Debug)]
enum RemoteEvent {
    Frame(String),
    Malformed(String),
    Error(String),
    Close,
}

/// Peer side of an accepted mock link
#[derive(Debug, Clone)]
pub struct MockRemote {
    inbound: mpsc::UnboundedSender<RemoteEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
}

impl MockRemote {
    /// Deliver a raw frame to the connection
    pub fn push_raw(&self, frame: impl Into<String>) {
        let _ = self.inbound.send(RemoteEvent::Frame(frame.into()));
    }

    pub fn push(&self, message: &ChannelMessage) {
        if let Ok(frame) = serde_json::to_string(message) {
            self.push_raw(frame);
        }
    }

    /// Deliver a frame the transport cannot decode
    pub fn push_malformed(&self, reason: impl Into<String>) {
        let _ = self.inbound.send(RemoteEvent::Malformed(reason.into()));
    }

    /// Break the link with a socket error
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.inbound.send(RemoteEvent::Error(message.into()));
    }

    /// Close the link cleanly from the peer side
    pub fn close(&self) {
        let _ = self.inbound.send(RemoteEvent::Close);
    }

    /// Make every subsequent write fail
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Frames written by the connection, in order
    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Written frames that decode as channel messages
    pub fn sent_messages(&self) -> Vec<ChannelMessage> {
        self.sent
            .lock()
            .iter()
            .filter_map(|frame| serde_json::from_str(frame).ok())
            .collect()
    }

    /// Whether the connection closed its side
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// In-memory `ChannelConnector` driven by scripts
///
/// Attempts beyond the queued scripts are refused.
#[derive(Debug, Default)]
pub struct MockChannelConnector {
    scripts: Mutex<VecDeque<LinkScript>>,
    attempts: AtomicU32,
    descriptors: Mutex<Vec<ChannelDescriptor>>,
    remotes: Mutex<Vec<MockRemote>>,
}

impl MockChannelConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the script for the next connect attempt
    pub fn push(&self, script: LinkScript) {
        self.scripts.lock().push_back(script);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Descriptors seen by each connect attempt
    pub fn descriptors(&self) -> Vec<ChannelDescriptor> {
        self.descriptors.lock().clone()
    }

    /// Peer of the `index`-th accepted link
    pub fn remote(&self, index: usize) -> Option<MockRemote> {
        self.remotes.lock().get(index).cloned()
    }

    /// Peer of the most recently accepted link
    pub fn latest_remote(&self) -> Option<MockRemote> {
        self.remotes.lock().last().cloned()
    }
}

impl ChannelConnector for MockChannelConnector {
    type Link = MockChannelLink;

    async fn connect(&self, descriptor: &ChannelDescriptor) -> Result<MockChannelLink, StreamError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.descriptors.lock().push(descriptor.clone());
        let script = self.scripts.lock().pop_front();
        debug!(channel = %descriptor.channel_name, attempt, "mock channel connect");

        match script {
            Some(LinkScript::Accept) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let remote = MockRemote {
                    inbound: tx,
                    sent: Arc::new(Mutex::new(Vec::new())),
                    closed: Arc::new(AtomicBool::new(false)),
                    fail_sends: Arc::new(AtomicBool::new(false)),
                };
                let link = MockChannelLink {
                    channel_name: descriptor.channel_name.clone(),
                    inbound: rx,
                    sent: Arc::clone(&remote.sent),
                    closed: Arc::clone(&remote.closed),
                    fail_sends: Arc::clone(&remote.fail_sends),
                };
                self.remotes.lock().push(remote);
                Ok(link)
            }
            Some(LinkScript::Refuse(message)) => {
                Err(StreamError::transport(&descriptor.channel_name, message))
            }
            Some(LinkScript::Hang) => std::future::pending().await,
            None => Err(StreamError::transport(
                &descriptor.channel_name,
                "no script queued",
            )),
        }
    }
}

/// Link produced by [`MockChannelConnector`]
#[derive(Debug)]
pub struct MockChannelLink {
    channel_name: String,
    inbound: mpsc::UnboundedReceiver<RemoteEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
}

impl ChannelLink for MockChannelLink {
    async fn send(&mut self, frame: String) -> Result<(), StreamError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StreamError::transport(&self.channel_name, "link closed"));
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(StreamError::transport(&self.channel_name, "write failed"));
        }
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, StreamError>> {
        match self.inbound.recv().await {
            Some(RemoteEvent::Frame(frame)) => Some(Ok(frame)),
            Some(RemoteEvent::Malformed(reason)) => {
                Some(Err(StreamError::protocol(&self.channel_name, reason)))
            }
            Some(RemoteEvent::Error(message)) => {
                Some(Err(StreamError::transport(&self.channel_name, message)))
            }
            Some(RemoteEvent::Close) | None => None,
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
