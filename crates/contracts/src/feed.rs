//! Feed data model - one-way push feeds
//!
//! A feed is a named source of timestamped points. Points are immutable
//! once created and shared as `Arc<FeedPoint>` between cache and subscribers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{ConnectionStatus, FailureKind, FeedMode, LiveIndicator};

/// Source id stamped on points produced by the fallback generator
pub const FALLBACK_SOURCE_ID: &str = "fallback";

/// A single decoded measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPoint {
    /// Measurement time (upstream-provided or receipt time)
    pub timestamp: DateTime<Utc>,

    /// Feed the point belongs to
    pub feed_name: String,

    /// Upstream provider identifier
    pub source_id: String,

    /// Measured values
    pub values: Map<String, Value>,

    /// Optional provider metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl FeedPoint {
    /// Whether this point was synthesized by a fallback source
    pub fn is_synthetic(&self) -> bool {
        self.source_id == FALLBACK_SOURCE_ID
    }
}

/// How inbound frames of a feed are decoded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// Generic envelope: `{timestamp?, source, rows | flat object, metadata?, error?, message?}`
    #[default]
    Envelope,
    /// Strict tabular payload: `rows` must be an array
    Rows,
}

/// Describes where a feed comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDescriptor {
    /// Feed name (registry key)
    pub feed_name: String,

    /// Endpoint path, resolved to a transport target by the connector
    pub endpoint_path: String,

    /// Payload adapter
    #[serde(default)]
    pub adapter: AdapterKind,
}

impl FeedDescriptor {
    pub fn new(feed_name: impl Into<String>, endpoint_path: impl Into<String>) -> Self {
        Self {
            feed_name: feed_name.into(),
            endpoint_path: endpoint_path.into(),
            adapter: AdapterKind::default(),
        }
    }

    pub fn with_adapter(mut self, adapter: AdapterKind) -> Self {
        self.adapter = adapter;
        self
    }
}

/// Snapshot of a feed connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedConnectionInfo {
    /// Connection identity, stable for the lifetime of the registry entry
    pub id: String,

    pub feed_name: String,

    pub status: ConnectionStatus,

    /// Live upstream or synthetic fallback
    pub mode: FeedMode,

    /// Last status change or data receipt
    pub last_update: DateTime<Utc>,

    /// Failures observed on this connection
    pub error_count: u32,

    /// Failed live attempts
    pub retry_count: u32,
}

impl FeedConnectionInfo {
    /// Fresh record in `connecting` state
    pub fn connecting(id: impl Into<String>, feed_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            feed_name: feed_name.into(),
            status: ConnectionStatus::Connecting,
            mode: FeedMode::Live,
            last_update: Utc::now(),
            error_count: 0,
            retry_count: 0,
        }
    }

    pub fn indicator(&self) -> LiveIndicator {
        LiveIndicator::derive(self.status, self.mode)
    }
}

/// Why a connection left the connected state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    /// Upstream signalled "no data available"
    NoData,
    /// Upstream payload carried an error field
    UpstreamError,
    /// Connect attempt exceeded the establishment timeout
    Timeout,
    /// Low-level transport failure
    Transport,
    /// Upstream closed the stream
    Closed,
    /// Local disconnect request
    Requested,
    /// Reconnect budget exhausted
    Abandoned,
}

/// Event delivered to feed subscribers
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Live attempt started
    Connecting { connection_id: String },
    /// Live transport opened
    Connected(FeedConnectionInfo),
    /// New point (live or synthetic)
    Data(Arc<FeedPoint>),
    /// A single frame could not be decoded; the stream continues
    DataError { kind: FailureKind, message: String },
    /// Transport failure on the live link
    Error { kind: FailureKind, message: String },
    /// Live link torn down
    Disconnected { reason: DisconnectReason },
    /// Synthetic source substituted; the feed is usable again
    Fallback(FeedConnectionInfo),
}

impl FeedEvent {
    /// Event type label (`data`, `connected`, ...)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Connected(_) => "connected",
            Self::Data(_) => "data",
            Self::DataError { .. } => "data_error",
            Self::Error { .. } => "error",
            Self::Disconnected { .. } => "disconnected",
            Self::Fallback(_) => "fallback",
        }
    }

    pub fn point(&self) -> Option<&Arc<FeedPoint>> {
        match self {
            Self::Data(point) => Some(point),
            _ => None,
        }
    }
}
