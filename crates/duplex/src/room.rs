//! ConsultationRoom - consumer-side view of one consultation channel
//!
//! Keeps a bounded window of recent conversation messages and the current
//! participant list, and builds the outbound message shapes peers expect.

use std::collections::VecDeque;
use std::sync::Arc;

use contracts::{ChannelEvent, ChannelMessage, ChannelMessageType};
use dispatcher::{ChannelDispatcher, Subscription};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::debug;

use crate::connection::ChannelConnection;

/// Inbound type carrying a consultation status change
const STATUS_MESSAGE_TYPE: &str = "consultation_status";

#[derive(Debug, Default)]
struct RoomState {
    messages: VecDeque<ChannelMessage>,
    participants: Vec<String>,
    status: Option<String>,
}

/// A joined consultation
pub struct ConsultationRoom {
    consultation_id: String,
    sender_id: String,
    connection: ChannelConnection,
    state: Arc<Mutex<RoomState>>,
    subscription: Subscription,
}

impl ConsultationRoom {
    /// Attach to `connection` and start collecting its events
    ///
    /// `window` bounds the number of retained conversation messages.
    pub fn attach(
        consultation_id: impl Into<String>,
        sender_id: impl Into<String>,
        connection: ChannelConnection,
        dispatcher: &ChannelDispatcher,
        window: usize,
    ) -> Self {
        let state = Arc::new(Mutex::new(RoomState {
            participants: connection.participants(),
            ..Default::default()
        }));

        let sink = Arc::clone(&state);
        let subscription = dispatcher.subscribe(
            connection.channel_name(),
            Arc::new(move |event: &ChannelEvent| record(&sink, event, window)),
        );

        Self {
            consultation_id: consultation_id.into(),
            sender_id: sender_id.into(),
            connection,
            state,
            subscription,
        }
    }

    pub fn consultation_id(&self) -> &str {
        &self.consultation_id
    }

    pub fn connection(&self) -> &ChannelConnection {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Recent `consultation_message` / `consultation_update` messages, oldest first
    pub fn messages(&self) -> Vec<ChannelMessage> {
        self.state.lock().messages.iter().cloned().collect()
    }

    pub fn participants(&self) -> Vec<String> {
        self.state.lock().participants.clone()
    }

    /// Last status reported by a peer
    pub fn status(&self) -> Option<String> {
        self.state.lock().status.clone()
    }

    /// Post a conversation message; `message_type` defaults to `"message"` upstream
    pub fn send_message(&self, content: &str, message_type: &str) -> bool {
        self.send(
            ChannelMessageType::ConsultationMessage,
            json!({
                "content": content,
                "messageType": message_type,
                "consultationId": self.consultation_id,
            }),
        )
    }

    pub fn send_typing_indicator(&self, is_typing: bool) -> bool {
        self.send(
            ChannelMessageType::TypingIndicator,
            json!({ "isTyping": is_typing, "consultationId": self.consultation_id }),
        )
    }

    pub fn update_status(&self, status: &str) -> bool {
        self.send(
            ChannelMessageType::ConsultationStatusUpdate,
            json!({ "status": status, "consultationId": self.consultation_id }),
        )
    }

    /// Stop collecting events
    ///
    /// If this was the channel's last subscriber, the channel is released.
    pub fn leave(self) {
        debug!(consultation = %self.consultation_id, "Leaving consultation room");
        self.subscription.unsubscribe();
    }

    fn send(&self, kind: ChannelMessageType, payload: Value) -> bool {
        let message = ChannelMessage::new(kind, payload)
            .with_sender(self.sender_id.as_str())
            .with_scope(self.consultation_id.as_str());
        self.connection.send(message)
    }
}

fn record(state: &Mutex<RoomState>, event: &ChannelEvent, window: usize) {
    let mut state = state.lock();
    match event {
        ChannelEvent::Message(message) => match &message.kind {
            ChannelMessageType::ConsultationMessage | ChannelMessageType::ConsultationUpdate => {
                state.messages.push_back(message.clone());
                while state.messages.len() > window {
                    state.messages.pop_front();
                }
            }
            ChannelMessageType::ConsultationStatusUpdate => {
                state.status = status_of(message);
            }
            ChannelMessageType::Other(kind) if kind == STATUS_MESSAGE_TYPE => {
                state.status = status_of(message);
            }
            _ => {}
        },
        ChannelEvent::ParticipantsChanged(ids) => state.participants = ids.clone(),
        _ => {}
    }
}

fn status_of(message: &ChannelMessage) -> Option<String> {
    message
        .payload
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ChannelContext, ChannelHandle, ChannelOptions};
    use crate::metrics::ChannelMetrics;
    use crate::mock::{LinkScript, MockChannelConnector};
    use contracts::{ChannelDescriptor, ConnectionStatus, StreamingConfig};
    use std::time::Duration;

    async fn connected_room(window: usize) -> (ChannelHandle, ConsultationRoom, Arc<MockChannelConnector>) {
        let ctx = ChannelContext {
            dispatcher: ChannelDispatcher::new("channel"),
            metrics: Arc::new(ChannelMetrics::new()),
        };
        let connector = Arc::new(MockChannelConnector::new());
        connector.push(LinkScript::Accept);

        let handle = ChannelHandle::spawn(
            "consultation-7-1",
            ChannelDescriptor::consultation("7", "ws://localhost/ws"),
            Arc::clone(&connector),
            ChannelOptions::from_config(&StreamingConfig::default()),
            ctx.clone(),
        );
        let room = ConsultationRoom::attach(
            "7",
            "dr-lee",
            handle.connection().clone(),
            &ctx.dispatcher,
            window,
        );
        handle
            .connection()
            .wait_until(|i| i.status == ConnectionStatus::Connected)
            .await;
        (handle, room, connector)
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_and_participants() {
        let (handle, room, connector) = connected_room(2).await;
        let remote = connector.remote(0).unwrap();

        for n in 0..3 {
            remote.push_raw(format!(
                r#"{{"type":"consultation_message","payload":{{"content":"m{n}"}}}}"#
            ));
        }
        remote.push_raw(r#"{"type":"typing_indicator","payload":{"isTyping":true}}"#);
        remote.push_raw(r#"{"type":"participants_list","payload":{"participants":["a","b"]}}"#);
        remote.push_raw(r#"{"type":"consultation_status","payload":{"status":"in_progress"}}"#);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let contents: Vec<Value> = room
            .messages()
            .iter()
            .map(|m| m.payload["content"].clone())
            .collect();
        assert_eq!(contents, vec![json!("m1"), json!("m2")]);
        assert_eq!(room.participants(), vec!["a", "b"]);
        assert_eq!(room.status().as_deref(), Some("in_progress"));

        room.leave();
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_shapes() {
        let (handle, room, connector) = connected_room(100).await;

        assert!(room.send_message("hello", "message"));
        assert!(room.send_typing_indicator(false));
        assert!(room.update_status("completed"));
        tokio::time::sleep(Duration::from_millis(1)).await;

        let sent = connector.remote(0).unwrap().sent_messages();
        let chat = sent
            .iter()
            .find(|m| m.kind == ChannelMessageType::ConsultationMessage)
            .unwrap();
        assert_eq!(chat.payload["content"], "hello");
        assert_eq!(chat.payload["messageType"], "message");
        assert_eq!(chat.sender_id.as_deref(), Some("dr-lee"));
        assert_eq!(chat.scope_id.as_deref(), Some("7"));

        let status = sent
            .iter()
            .find(|m| m.kind == ChannelMessageType::ConsultationStatusUpdate)
            .unwrap();
        assert_eq!(status.payload["status"], "completed");
        assert!(sent
            .iter()
            .any(|m| m.kind == ChannelMessageType::TypingIndicator && m.payload["isTyping"] == false));

        room.leave();
        handle.shutdown().await;
    }
}
