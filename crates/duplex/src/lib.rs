//! # Duplex
//!
//! 双向会诊通道：每个通道一个独立任务，负责连接、加入会诊、
//! 心跳保活、指数退避重连以及参与者列表维护。
//!
//! ## Flow
//! ```text
//! ChannelConnector ──connect──> ChannelLink
//!                                   │ recv
//!                                   v
//!              control message? ──yes──> ParticipantSet ──> ParticipantsChanged
//!                                   │ no
//!                                   v
//!                        ChannelEvent::Message ──> ChannelDispatcher
//! ```
//!
//! Transports: [`WsChannelConnector`] (feature `ws`) and the in-memory
//! [`MockChannelConnector`] used by tests.

pub mod backoff;
pub mod connection;
pub mod heartbeat;
pub mod metrics;
pub mod mock;
pub mod participants;
pub mod room;
#[cfg(feature = "ws")]
pub mod ws;

pub use backoff::BackoffPolicy;
pub use connection::{
    ChannelConnection, ChannelContext, ChannelHandle, ChannelOptions, SYSTEM_SENDER_ID,
};
pub use heartbeat::{HeartbeatMonitor, STALE_AFTER_INTERVALS};
pub use metrics::{ChannelMetrics, MetricsSnapshot};
pub use mock::{LinkScript, MockChannelConnector, MockChannelLink, MockRemote};
pub use participants::ParticipantSet;
pub use room::ConsultationRoom;
#[cfg(feature = "ws")]
pub use ws::{WsChannelConnector, WsChannelLink};
