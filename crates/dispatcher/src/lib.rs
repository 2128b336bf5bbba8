//! # Dispatcher
//!
//! 进程内事件分发模块。
//!
//! 负责：
//! - 按 feed / channel 名称维护订阅者列表
//! - 同步、按注册顺序投递事件
//! - 隔离 panic 的订阅者，不影响其余订阅者

pub mod dispatcher;
pub mod metrics;
pub mod subscription;

pub use contracts::{ChannelEvent, EventCallback, FeedEvent};
pub use dispatcher::{EventDispatcher, IdleHook};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use subscription::Subscription;

/// Dispatcher for feed lifecycle and data events
pub type FeedDispatcher = EventDispatcher<FeedEvent>;

/// Dispatcher for channel lifecycle and message events
pub type ChannelDispatcher = EventDispatcher<ChannelEvent>;
