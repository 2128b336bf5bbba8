//! Mock feed transport
//!
//! 用于无网络环境的测试：每次 `connect` 消费一个脚本，脚本决定
//! 连接是成功、失败还是挂起，以及随后推送的帧序列。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::{FeedConnector, FeedDescriptor, FeedStream, StreamError};
use parking_lot::Mutex;
use tracing::{debug, trace};

/// One step of an open stream
#[derive(Debug, Clone)]
pub enum FeedStep {
    /// Deliver a raw frame
    Frame(String),
    /// Fail the stream with a transport error
    Error(String),
    /// Wait before the next step
    Pause(Duration),
    /// Close the stream from the upstream side
    Close,
}

#[derive(Debug, Clone)]
enum ConnectBehavior {
    Open(Vec<FeedStep>),
    Refuse(String),
    Hang,
}

/// Behaviour of a single connect attempt
#[derive(Debug, Clone)]
pub struct FeedScript {
    delay: Duration,
    behavior: ConnectBehavior,
}

impl FeedScript {
    /// Open successfully and push `frames`; the stream then stays open
    pub fn open<S: Into<String>>(frames: impl IntoIterator<Item = S>) -> Self {
        Self::steps(frames.into_iter().map(|f| FeedStep::Frame(f.into())))
    }

    /// Open successfully and play `steps`
    pub fn steps(steps: impl IntoIterator<Item = FeedStep>) -> Self {
        Self {
            delay: Duration::ZERO,
            behavior: ConnectBehavior::Open(steps.into_iter().collect()),
        }
    }

    /// Fail the connect attempt with a transport error
    pub fn refuse(message: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            behavior: ConnectBehavior::Refuse(message.into()),
        }
    }

    /// Never complete the connect attempt
    pub fn hang() -> Self {
        Self {
            delay: Duration::ZERO,
            behavior: ConnectBehavior::Hang,
        }
    }

    /// Complete the connect attempt only after `delay`
    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// In-memory `FeedConnector` driven by scripts
///
/// Attempts beyond the queued scripts are refused.
#[derive(Debug, Default)]
pub struct ScriptedFeedConnector {
    scripts: Mutex<VecDeque<FeedScript>>,
    attempts: AtomicU32,
    closed: Arc<AtomicU32>,
}

impl ScriptedFeedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the script for the next connect attempt
    pub fn push(&self, script: FeedScript) {
        self.scripts.lock().push_back(script);
    }

    /// Connect attempts so far
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Streams closed by the connection
    pub fn closed_count(&self) -> u32 {
        self.closed.load(Ordering::SeqCst)
    }
}

impl FeedConnector for ScriptedFeedConnector {
    type Stream = ScriptedFeedStream;

    async fn connect(&self, descriptor: &FeedDescriptor) -> Result<ScriptedFeedStream, StreamError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let script = self.scripts.lock().pop_front();
        debug!(feed = %descriptor.feed_name, attempt, "mock feed connect");

        let Some(script) = script else {
            return Err(StreamError::transport(
                &descriptor.feed_name,
                "no script queued",
            ));
        };

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }

        match script.behavior {
            ConnectBehavior::Open(steps) => Ok(ScriptedFeedStream {
                feed_name: descriptor.feed_name.clone(),
                steps: steps.into(),
                closed: Arc::clone(&self.closed),
                is_closed: false,
            }),
            ConnectBehavior::Refuse(message) => {
                Err(StreamError::transport(&descriptor.feed_name, message))
            }
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }
}

/// Stream produced by [`ScriptedFeedConnector`]
#[derive(Debug)]
pub struct ScriptedFeedStream {
    feed_name: String,
    steps: VecDeque<FeedStep>,
    closed: Arc<AtomicU32>,
    is_closed: bool,
}

impl FeedStream for ScriptedFeedStream {
    async fn next_frame(&mut self) -> Option<Result<String, StreamError>> {
        loop {
            if self.is_closed {
                return None;
            }
            match self.steps.pop_front() {
                Some(FeedStep::Frame(frame)) => {
                    trace!(feed = %self.feed_name, "mock frame");
                    return Some(Ok(frame));
                }
                Some(FeedStep::Error(message)) => {
                    return Some(Err(StreamError::transport(&self.feed_name, message)))
                }
                Some(FeedStep::Pause(delay)) => tokio::time::sleep(delay).await,
                Some(FeedStep::Close) => return None,
                None => std::future::pending::<()>().await,
            }
        }
    }

    async fn close(&mut self) {
        if !self.is_closed {
            self.is_closed = true;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
