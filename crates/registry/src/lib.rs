//! # Registry
//!
//! 应用唯一入口：按名称管理 feed 与 channel 连接。
//!
//! - `connect_feed` / `connect_channel` 幂等创建连接
//! - `subscribe_*` 注册回调，最后一个订阅者退出时自动释放连接
//! - `disconnect` 取消所有定时器与进行中的连接尝试
//!
//! ```ignore
//! let registry = ConnectionRegistry::new(config, Arc::new(feeds), Arc::new(channels));
//! let _sub = registry.subscribe_feed("ontario_demand", Arc::new(|event| { /* ... */ }));
//! registry.connect_feed(FeedDescriptor::new("ontario_demand", "/functions/v1/stream-ontario-demand"));
//! ```

mod registry;

pub use registry::ConnectionRegistry;

/// Registry over the in-memory transports
pub type MockRegistry = ConnectionRegistry<ingestion::ScriptedFeedConnector, duplex::MockChannelConnector>;

/// Registry over SSE feeds and WebSocket channels
#[cfg(all(feature = "sse", feature = "ws"))]
pub type LiveRegistry = ConnectionRegistry<ingestion::SseFeedConnector, duplex::WsChannelConnector>;
