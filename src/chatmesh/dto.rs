//! Wire-level records exchanged with the broker.
//!
//! Everything in this module is a plain serde value: once produced, a record
//! is never mutated.  [`Message`] identity lives in `message_id` (a
//! client-generated UUID); [`Chat`] keeps its member list in insertion order,
//! which is also the round-robin speaking order used by
//! [`ChatManager`](crate::ChatManager).

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_message_type() -> String {
    "text".to_string()
}

/// Identity record for a broker member, human or agent.
///
/// `member_id` is assigned at signup and never changes; `name` is the display
/// name other members see in transcripts and prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub member_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Chats this member receives messages from without participating in.
    #[serde(default)]
    pub listen_in_chats: Vec<String>,
}

/// A named room on the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    pub chat_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub is_group: bool,
    /// Member ids in insertion order.  The round-robin speaking order.
    #[serde(default)]
    pub members: Vec<String>,
    pub created_by: String,
    #[serde(rename = "createdAt", default)]
    pub created_at: String,
    /// At most one member arbiters a chat; enforced server-side.
    #[serde(default)]
    pub manager: Option<String>,
    /// Members that receive this chat's messages without participating.
    #[serde(default)]
    pub listeners: Vec<String>,
}

/// One atomic utterance in a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub chat_id: String,
    pub from_member_id: String,
    /// Denormalized sender name so transcripts render without a lookup.
    #[serde(default)]
    pub from_member_name: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    pub message: String,
    /// RFC 3339 timestamp stamped at production time.
    #[serde(default)]
    pub timestamp: String,
}

/// A [`Message`] with a declared destination chat.
///
/// Notifications are the chat-manager side channel: an entity that
/// participates in chat A sends one to inform the manager of chat B, who then
/// posts a readable relay into B.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub message: Message,
    pub to_chat_id: String,
}

/// Typed RPC request carried over the messaging transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command: String,
    /// Originating member id.
    pub by: String,
    /// Recipient member ids.  Each recipient produces exactly one result.
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub data: Value,
}

/// The `(command, by, to)` triple echoed back with each command result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandBasicInfo {
    pub command: String,
    pub by: String,
    pub to: String,
}

/// One recipient's reply to a [`Command`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub result: Value,
    pub command: CommandBasicInfo,
}

/// Payload of the `next_speaker` push: the named member is expected to
/// produce the next message in `chat_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextSpeaker {
    pub chat_id: String,
    pub member_id: String,
    #[serde(default)]
    pub manager_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_type_defaults_to_text() {
        let message: Message = serde_json::from_value(json!({
            "message_id": "m1",
            "chat_id": "c1",
            "from_member_id": "alice",
            "message": "hello"
        }))
        .unwrap();
        assert_eq!(message.message_type, "text");
        assert_eq!(message.from_member_name, "");
    }

    #[test]
    fn test_notification_flattens_message_fields() {
        let notification = Notification {
            message: Message {
                message_id: "m1".into(),
                chat_id: "wolves".into(),
                from_member_id: "host".into(),
                from_member_name: "Host".into(),
                message_type: "text".into(),
                message: "a player was attacked".into(),
                timestamp: "2026-01-01T00:00:00Z".into(),
            },
            to_chat_id: "village".into(),
        };

        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["chat_id"], "wolves");
        assert_eq!(value["to_chat_id"], "village");

        let back: Notification = serde_json::from_value(value).unwrap();
        assert_eq!(back, notification);
    }

    #[test]
    fn test_chat_created_at_uses_wire_name() {
        let chat: Chat = serde_json::from_value(json!({
            "chat_id": "c1",
            "name": "panel",
            "is_group": true,
            "members": ["m", "a", "b"],
            "created_by": "m",
            "createdAt": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(chat.created_at, "2026-01-01T00:00:00Z");
        assert_eq!(chat.manager, None);
        assert!(serde_json::to_value(&chat).unwrap()["createdAt"].is_string());
    }
}
