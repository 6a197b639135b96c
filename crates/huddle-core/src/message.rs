use serde::{Deserialize, Serialize};

use crate::attachment::Attachment;
use crate::time::epoch_millis;
use crate::user::User;

/// Maximum size in bytes of text content and attachment descriptions.
pub const MAX_CONTENT_BYTES: usize = 5000;

/// Maximum number of attachments per message.
pub const MAX_ATTACHMENTS: usize = 3;

/// Maximum size in bytes of a single inbound WebSocket frame.
pub const MAX_FRAME_BYTES: usize = 8192;

/// A server-authoritative message envelope. Immutable after construction;
/// the server assigns `id` and `timestamp`.
///
/// Wire shape: `{"id", "roomCode", "sender", "timestamp", "type", "payload"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "roomCode")]
    pub room_code: String,
    pub sender: User,
    pub timestamp: i64,
    #[serde(flatten)]
    pub body: Body,
}

/// Typed message payloads, tagged by the wire `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Body {
    Text(TextPayload),
    Attachments(AttachmentsPayload),
    UserJoined(UserEventPayload),
    UserLeft(UserEventPayload),
    Error(ErrorPayload),
    InitData(InitDataPayload),
    Confirm(ConfirmPayload),
    TokenUpdate(TokenUpdatePayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPayload {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentsPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEventPayload {
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitDataPayload {
    #[serde(rename = "currentUser")]
    pub current_user: User,
    #[serde(rename = "onlineUsers")]
    pub online_users: Vec<User>,
    #[serde(rename = "maxUsers")]
    pub max_users: usize,
}

/// Acknowledgement echoed to a sender, mapping its client-chosen `tempId`
/// to the authoritative message id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmPayload {
    #[serde(rename = "tempId")]
    pub temp_id: String,
    pub id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUpdatePayload {
    pub token: String,
}

impl Message {
    /// Build a new envelope with a fresh UUID v4 id and the current
    /// timestamp in milliseconds.
    pub fn new(room_code: impl Into<String>, sender: User, body: Body) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            room_code: room_code.into(),
            sender,
            timestamp: epoch_millis(),
            body,
        }
    }

    /// Serialize for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An inbound client frame: `{"type", "payload", "tempId"?}`. The type is
/// kept as a raw string so unknown types can be logged and ignored without
/// failing the whole frame.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "tempId", default)]
    pub temp_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::Role;

    fn sender() -> User {
        User::new("guest_a1B2c3", "Alice", Role::Guest)
    }

    #[test]
    fn envelope_assigns_id_and_timestamp() {
        let msg = Message::new(
            "aB3xY9",
            sender(),
            Body::Text(TextPayload {
                content: "hi".into(),
            }),
        );
        assert!(!msg.id.is_empty());
        assert!(msg.timestamp > 0);
        assert_eq!(msg.room_code, "aB3xY9");
    }

    #[test]
    fn text_envelope_wire_shape() {
        let msg = Message::new(
            "aB3xY9",
            sender(),
            Body::Text(TextPayload {
                content: "hi".into(),
            }),
        );
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "TEXT");
        assert_eq!(value["payload"]["content"], "hi");
        assert_eq!(value["roomCode"], "aB3xY9");
        assert_eq!(value["sender"]["id"], "guest_a1B2c3");
        assert!(value["id"].is_string());
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn system_event_types_serialize_screaming_snake() {
        let joined = Message::new(
            "aB3xY9",
            User::system(),
            Body::UserJoined(UserEventPayload { user: sender() }),
        );
        let value: serde_json::Value = serde_json::from_str(&joined.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "USER_JOINED");

        let init = Message::new(
            "aB3xY9",
            User::system(),
            Body::InitData(InitDataPayload {
                current_user: sender(),
                online_users: vec![sender()],
                max_users: 2,
            }),
        );
        let value: serde_json::Value = serde_json::from_str(&init.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "INIT_DATA");
        assert_eq!(value["payload"]["maxUsers"], 2);

        let update = Message::new(
            "aB3xY9",
            User::system(),
            Body::TokenUpdate(TokenUpdatePayload {
                token: "tok".into(),
            }),
        );
        let value: serde_json::Value = serde_json::from_str(&update.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "TOKEN_UPDATE");
    }

    #[test]
    fn confirm_payload_wire_field_names() {
        let msg = Message::new(
            "aB3xY9",
            sender(),
            Body::Confirm(ConfirmPayload {
                temp_id: "t-7".into(),
                id: "m-1".into(),
                timestamp: 42,
            }),
        );
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "CONFIRM");
        assert_eq!(value["payload"]["tempId"], "t-7");
        assert_eq!(value["payload"]["id"], "m-1");
        assert_eq!(value["payload"]["timestamp"], 42);
    }

    #[test]
    fn inbound_frame_parses_with_and_without_temp_id() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"TEXT","payload":{"content":"hi"},"tempId":"t-1"}"#)
                .unwrap();
        assert_eq!(frame.kind, "TEXT");
        assert_eq!(frame.temp_id.as_deref(), Some("t-1"));

        let frame: InboundFrame =
            serde_json::from_str(r#"{"type":"ATTACHMENTS","payload":{"attachments":[]}}"#).unwrap();
        assert_eq!(frame.kind, "ATTACHMENTS");
        assert!(frame.temp_id.is_none());
    }

    #[test]
    fn inbound_frame_keeps_unknown_types() {
        let frame: InboundFrame = serde_json::from_str(r#"{"type":"DANCE","payload":{}}"#).unwrap();
        assert_eq!(frame.kind, "DANCE");
    }

    #[test]
    fn envelope_round_trips() {
        let msg = Message::new(
            "aB3xY9",
            sender(),
            Body::Error(ErrorPayload {
                code: 2104,
                message: "full".into(),
            }),
        );
        let round: Message = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(round, msg);
    }
}
