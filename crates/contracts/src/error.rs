//! Layered error definitions
//!
//! Categorized by source: transport / protocol / liveness / capacity / config

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type
///
/// Every variant is recovered locally by the connection that produced it:
/// it becomes a status transition plus a dispatched lifecycle event.
#[derive(Debug, Error)]
pub enum StreamError {
    // ===== Connection Errors =====
    /// Connection-level failure (open, read or write on the transport)
    #[error("transport error on '{name}': {message}")]
    Transport { name: String, message: String },

    /// Malformed or unexpected payload
    #[error("protocol error on '{name}': {message}")]
    Protocol { name: String, message: String },

    /// No traffic observed within the heartbeat staleness window
    #[error("stale connection '{name}': no message for {silent_ms}ms")]
    StaleConnection { name: String, silent_ms: u64 },

    /// A bounded resource (queue, cache, retry budget) was exhausted
    #[error("capacity exceeded on '{name}': {message}")]
    Capacity { name: String, message: String },

    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl StreamError {
    /// Create transport error
    pub fn transport(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create protocol error
    pub fn protocol(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create capacity error
    pub fn capacity(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Capacity {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Classify the error for lifecycle events
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport { .. } | Self::Io(_) => FailureKind::Transport,
            Self::Protocol { .. } => FailureKind::Protocol,
            Self::StaleConnection { .. } => FailureKind::StaleConnection,
            Self::Capacity { .. } => FailureKind::Capacity,
            Self::ConfigParse { .. } | Self::ConfigValidation { .. } | Self::Other(_) => {
                FailureKind::Other
            }
        }
    }
}

/// Cloneable error classification carried inside lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Protocol,
    StaleConnection,
    Capacity,
    Other,
}

impl FailureKind {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::StaleConnection => "stale_connection",
            Self::Capacity => "capacity",
            Self::Other => "other",
        }
    }
}
