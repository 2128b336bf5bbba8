//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the feed layer.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Wall-clock timestamps (`chrono::DateTime<Utc>`) on points and messages
//! - Monotonic `tokio::time::Instant` for cache age, heartbeat and backoff

mod channel;
mod config;
mod error;
mod feed;
mod status;
mod transport;

use std::sync::Arc;

pub use channel::*;
pub use config::*;
pub use error::*;
pub use feed::*;
pub use status::*;
pub use transport::*;

/// Subscriber callback type
///
/// Uses `Arc` so the dispatcher can hand out snapshots of the subscriber list.
pub type EventCallback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Feed subscriber callback
pub type FeedCallback = EventCallback<FeedEvent>;

/// Channel subscriber callback
pub type ChannelCallback = EventCallback<ChannelEvent>;
