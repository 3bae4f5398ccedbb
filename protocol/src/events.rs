//! WebSocket Event DTOs - Data Transfer Objects per eventi WebSocket

use crate::message::{CreateMessageDTO, MessageDTO};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ReadReceiptDTO {
    pub message_id: String,
    pub reader_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TypingDTO {
    pub conversation_id: String,
    pub user_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ConversationUpdateDTO {
    pub conversation_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PresenceDTO {
    pub user_id: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorDTO {
    pub code: u16,
    pub message: String,
}

/// Enum per gestire gli eventi server -> client in modo type-safe.
/// Tagged union: serde serializza questo come
/// `{ "type": "NewMessage", "data": { ... } }`
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", content = "data")]
pub enum WsEvent {
    NewMessage(MessageDTO),
    ReadReceipt(ReadReceiptDTO),
    TypingStarted(TypingDTO),
    TypingStopped(TypingDTO),
    ConversationUpdated(ConversationUpdateDTO),
    PresenceChanged(PresenceDTO),
    Error(ErrorDTO),
}

/// Eventi client -> server, stessa codifica tagged.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", content = "data")]
pub enum ClientEvent {
    SendMessage(CreateMessageDTO),
    MarkRead { message_id: String },
    TypingStart { conversation_id: String },
    TypingStop { conversation_id: String },
    Join { conversation_id: String },
    Leave { conversation_id: String },
    Heartbeat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[test]
    fn ws_event_uses_tagged_encoding() {
        let event = WsEvent::PresenceChanged(PresenceDTO {
            user_id: "alice".into(),
            is_online: true,
            last_seen: Utc::now(),
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"PresenceChanged""#));
        assert!(json.contains(r#""data""#));
    }

    #[test]
    fn client_event_round_trips() {
        let event = ClientEvent::SendMessage(CreateMessageDTO {
            message_id: "outbox-1".into(),
            recipient_id: Some("bob".into()),
            group_id: None,
            content: "hello".into(),
            message_type: MessageType::Text,
            attachments: vec![],
            reply_to: None,
        });
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ClientEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientEvent::SendMessage(dto) => assert_eq!(dto.message_id, "outbox-1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
