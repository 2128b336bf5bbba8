//! # Ingestion
//!
//! One-way feed ingestion.
//!
//! Responsibilities:
//! - Run one `PushStreamConnection` task per feed name
//! - Decode upstream frames through per-source adapters
//! - Push points into the `DataCache` and fan out via the dispatcher
//! - Substitute a `FallbackSource` when the live link fails or has no data
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{FeedContext, FeedHandle, FeedOptions, SseFeedConnector};
//!
//! let connector = Arc::new(SseFeedConnector::new("https://example.supabase.co"));
//! let handle = FeedHandle::spawn(
//!     "ontario_demand-1",
//!     FeedDescriptor::new("ontario_demand", "/functions/v1/stream-ontario-demand"),
//!     connector,
//!     FeedOptions::from_config(&config),
//!     ctx,
//! );
//! let info = handle.connection().info();
//! ```
//!
//! ## Mock Testing
//!
//! ```ignore
//! use ingestion::{FeedScript, ScriptedFeedConnector};
//!
//! let connector = ScriptedFeedConnector::new();
//! connector.push(FeedScript::open([r#"{"source":"ieso","demand":1}"#]));
//! ```

mod adapter;
mod adapters;
mod connection;
mod fallback;
mod metrics;
mod mock;
#[cfg(feature = "sse")]
mod sse;

// Re-exports
pub use adapter::{adapter_for, DecodedFrame, FeedAdapter};
pub use adapters::{EnvelopeAdapter, RowsAdapter};
pub use connection::{FeedConnection, FeedContext, FeedHandle, FeedOptions};
pub use fallback::{
    DailyProfileGenerator, FallbackSource, SyntheticGenerator, DEFAULT_HOURLY_FACTORS,
};
pub use metrics::{FeedMetrics, MetricsSnapshot};
pub use mock::{FeedScript, FeedStep, ScriptedFeedConnector, ScriptedFeedStream};
#[cfg(feature = "sse")]
pub use sse::{SseFeedConnector, SseFeedStream, SseParser};
