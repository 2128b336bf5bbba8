//! Channel data model - bidirectional consultation channels

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{ConnectionStatus, DisconnectReason, FailureKind};

/// Channel name prefix for consultation-scoped channels
pub const CONSULTATION_CHANNEL_PREFIX: &str = "consultation-";

/// Channel name for a consultation id
pub fn consultation_channel_name(consultation_id: &str) -> String {
    format!("{CONSULTATION_CHANNEL_PREFIX}{consultation_id}")
}

/// Channel message type
///
/// Unknown types are kept verbatim in [`ChannelMessageType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChannelMessageType {
    JoinConsultation,
    LeaveConsultation,
    ConsultationMessage,
    ConsultationUpdate,
    ParticipantJoined,
    ParticipantLeft,
    ParticipantsList,
    ConsultationStatusUpdate,
    Ping,
    TypingIndicator,
    Other(String),
}

impl ChannelMessageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::JoinConsultation => "join_consultation",
            Self::LeaveConsultation => "leave_consultation",
            Self::ConsultationMessage => "consultation_message",
            Self::ConsultationUpdate => "consultation_update",
            Self::ParticipantJoined => "participant_joined",
            Self::ParticipantLeft => "participant_left",
            Self::ParticipantsList => "participants_list",
            Self::ConsultationStatusUpdate => "consultation_status_update",
            Self::Ping => "ping",
            Self::TypingIndicator => "typing_indicator",
            Self::Other(other) => other,
        }
    }

    /// Join/leave/participant types that mutate the participant set
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::JoinConsultation
                | Self::LeaveConsultation
                | Self::ParticipantJoined
                | Self::ParticipantLeft
                | Self::ParticipantsList
        )
    }
}

impl From<String> for ChannelMessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "join_consultation" => Self::JoinConsultation,
            "leave_consultation" => Self::LeaveConsultation,
            "consultation_message" => Self::ConsultationMessage,
            "consultation_update" => Self::ConsultationUpdate,
            "participant_joined" => Self::ParticipantJoined,
            "participant_left" => Self::ParticipantLeft,
            "participants_list" => Self::ParticipantsList,
            "consultation_status_update" => Self::ConsultationStatusUpdate,
            "ping" => Self::Ping,
            "typing_indicator" => Self::TypingIndicator,
            _ => Self::Other(value),
        }
    }
}

impl From<ChannelMessageType> for String {
    fn from(value: ChannelMessageType) -> Self {
        match value {
            ChannelMessageType::Other(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ChannelMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message exchanged on a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    #[serde(rename = "type")]
    pub kind: ChannelMessageType,

    #[serde(default)]
    pub payload: Value,

    /// Backfilled on send when absent; overwritten with receipt time on arrival
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,

    /// Consultation scope
    #[serde(
        default,
        rename = "consultationId",
        skip_serializing_if = "Option::is_none"
    )]
    pub scope_id: Option<String>,
}

/// RFC 3339 string or epoch milliseconds; anything else reads as absent
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let stamp = match Value::deserialize(deserializer)? {
        Value::String(s) => DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    };
    Ok(stamp)
}

impl ChannelMessage {
    pub fn new(kind: ChannelMessageType, payload: Value) -> Self {
        Self {
            kind,
            payload,
            timestamp: None,
            sender_id: None,
            scope_id: None,
        }
    }

    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    pub fn with_scope(mut self, scope_id: impl Into<String>) -> Self {
        self.scope_id = Some(scope_id.into());
        self
    }

    /// Keep-alive sent by the heartbeat
    pub fn ping() -> Self {
        let now = Utc::now();
        Self {
            kind: ChannelMessageType::Ping,
            payload: serde_json::json!({ "timestamp": now.timestamp_millis() }),
            timestamp: Some(now),
            sender_id: Some("system".to_string()),
            scope_id: None,
        }
    }
}

/// Describes how to (re)establish a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDescriptor {
    /// Channel name (registry key)
    pub channel_name: String,

    /// Transport endpoint (e.g. `wss://host/socket`)
    pub endpoint: String,

    /// Bearer token presented on every (re)connect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Consultation id joined on open and left on intentional close
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_id: Option<String>,
}

impl ChannelDescriptor {
    pub fn new(channel_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            channel_name: channel_name.into(),
            endpoint: endpoint.into(),
            auth_token: None,
            scope_id: None,
        }
    }

    /// Descriptor for a consultation channel (`consultation-{id}`)
    pub fn consultation(consultation_id: &str, endpoint: impl Into<String>) -> Self {
        Self {
            channel_name: consultation_channel_name(consultation_id),
            endpoint: endpoint.into(),
            auth_token: None,
            scope_id: Some(consultation_id.to_string()),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

/// Snapshot of a channel connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConnectionInfo {
    pub id: String,
    pub channel_name: String,
    pub status: ConnectionStatus,
    /// Consecutive reconnect attempts since the last successful open
    pub reconnect_count: u32,
    /// Last time any inbound message was observed
    pub last_heartbeat: DateTime<Utc>,
}

impl ChannelConnectionInfo {
    pub fn connecting(id: impl Into<String>, channel_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel_name: channel_name.into(),
            status: ConnectionStatus::Connecting,
            reconnect_count: 0,
            last_heartbeat: Utc::now(),
        }
    }
}

/// Event delivered to channel subscribers
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Connecting { attempt: u32 },
    Connected { connection_id: String },
    /// Non-control message, receipt-stamped
    Message(ChannelMessage),
    /// Participant set changed after a control message
    ParticipantsChanged(Vec<String>),
    Error { kind: FailureKind, message: String },
    ReconnectScheduled { attempt: u32, delay: Duration },
    SendError { message: String },
    Disconnected { reason: DisconnectReason },
}

impl ChannelEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
            Self::Message(_) => "message",
            Self::ParticipantsChanged(_) => "participants",
            Self::Error { .. } => "error",
            Self::ReconnectScheduled { .. } => "reconnect_scheduled",
            Self::SendError { .. } => "send_error",
            Self::Disconnected { .. } => "disconnected",
        }
    }
}
