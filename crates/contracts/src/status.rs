//! Connection status shared by feeds and channels.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a feed or channel connection
///
/// Written only by the connection task that owns it; readers observe
/// snapshots through a `watch` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

/// Where a feed's data currently comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedMode {
    #[default]
    Live,
    Fallback,
}

/// UI-facing indicator derived from status and mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveIndicator {
    Connecting,
    Live,
    Fallback,
    Offline,
}

impl LiveIndicator {
    pub fn derive(status: ConnectionStatus, mode: FeedMode) -> Self {
        match (status, mode) {
            (ConnectionStatus::Connecting, _) => Self::Connecting,
            (ConnectionStatus::Connected, FeedMode::Live) => Self::Live,
            (ConnectionStatus::Connected, FeedMode::Fallback) => Self::Fallback,
            (ConnectionStatus::Disconnected | ConnectionStatus::Error, _) => Self::Offline,
        }
    }
}
