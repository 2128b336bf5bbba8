//! Feed 适配器 trait
//!
//! 每个上游来源一个适配器，负责把原始帧解码为有类型的结果，
//! 而不是在连接逻辑里到处猜字段名。

use std::sync::Arc;

use contracts::{AdapterKind, FeedPoint, StreamError};

use crate::adapters::{EnvelopeAdapter, RowsAdapter};

/// Result of decoding one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    /// A valid measurement
    Point(FeedPoint),
    /// Upstream signalled "no data available"
    NoData(String),
    /// Upstream payload carried an `error` field
    UpstreamError(String),
}

/// Feed 适配器 trait
///
/// `decode` 返回：
/// 1. `Ok(DecodedFrame)` - 有效数据或上游终止信号
/// 2. `Err(StreamError::Protocol)` - 该帧格式错误，流继续
pub trait FeedAdapter: Send + Sync {
    /// 适配器名称（用于日志）
    fn name(&self) -> &'static str;

    /// 解码一帧
    fn decode(&self, feed_name: &str, frame: &str) -> Result<DecodedFrame, StreamError>;
}

/// Adapter for the configured kind
pub fn adapter_for(kind: AdapterKind) -> Arc<dyn FeedAdapter> {
    match kind {
        AdapterKind::Envelope => Arc::new(EnvelopeAdapter),
        AdapterKind::Rows => Arc::new(RowsAdapter),
    }
}
