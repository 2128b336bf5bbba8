//! Channel-scoped participant set, driven by control messages

use contracts::{ChannelMessage, ChannelMessageType};
use serde_json::Value;

/// Participants in join order, without duplicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantSet {
    ids: Vec<String>,
}

impl ParticipantSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.iter().any(|p| p == id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Apply a control message; returns whether the set changed
    ///
    /// - `join_consultation` / `participant_joined`: add `senderId`
    /// - `leave_consultation` / `participant_left`: remove `senderId`
    /// - `participants_list`: replace with `payload.participants`
    pub fn apply(&mut self, message: &ChannelMessage) -> bool {
        match message.kind {
            ChannelMessageType::JoinConsultation | ChannelMessageType::ParticipantJoined => {
                match message.sender_id.as_deref() {
                    Some(id) if !id.is_empty() && !self.contains(id) => {
                        self.ids.push(id.to_string());
                        true
                    }
                    _ => false,
                }
            }
            ChannelMessageType::LeaveConsultation | ChannelMessageType::ParticipantLeft => {
                let Some(id) = message.sender_id.as_deref() else {
                    return false;
                };
                let before = self.ids.len();
                self.ids.retain(|p| p != id);
                self.ids.len() != before
            }
            ChannelMessageType::ParticipantsList => {
                let mut next: Vec<String> = Vec::new();
                if let Some(Value::Array(list)) = message.payload.get("participants") {
                    for id in list.iter().filter_map(Value::as_str) {
                        if !next.iter().any(|p| p == id) {
                            next.push(id.to_string());
                        }
                    }
                }
                let changed = next != self.ids;
                self.ids = next;
                changed
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn msg(kind: ChannelMessageType, sender: &str) -> ChannelMessage {
        ChannelMessage::new(kind, Value::Null).with_sender(sender)
    }

    #[test]
    fn test_join_leave() {
        let mut set = ParticipantSet::new();
        assert!(set.apply(&msg(ChannelMessageType::ParticipantJoined, "alice")));
        assert!(set.apply(&msg(ChannelMessageType::JoinConsultation, "bob")));
        assert!(!set.apply(&msg(ChannelMessageType::ParticipantJoined, "alice")));
        assert_eq!(set.ids(), ["alice", "bob"]);

        assert!(set.apply(&msg(ChannelMessageType::ParticipantLeft, "alice")));
        assert!(!set.apply(&msg(ChannelMessageType::ParticipantLeft, "carol")));
        assert_eq!(set.ids(), ["bob"]);
    }

    #[test]
    fn test_list_replaces() {
        let mut set = ParticipantSet::new();
        set.apply(&msg(ChannelMessageType::ParticipantJoined, "zed"));

        let list = ChannelMessage::new(
            ChannelMessageType::ParticipantsList,
            json!({"participants": ["a", "b", "a", 7]}),
        );
        assert!(set.apply(&list));
        assert_eq!(set.ids(), ["a", "b"]);
        assert!(!set.apply(&list));
    }

    #[test]
    fn test_non_control_ignored() {
        let mut set = ParticipantSet::new();
        assert!(!set.apply(&msg(ChannelMessageType::ConsultationMessage, "alice")));
        assert!(set.is_empty());
    }
}
