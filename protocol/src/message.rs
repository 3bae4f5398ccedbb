//! Message DTOs - Data Transfer Objects per messaggi

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Attachment,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Attachment => "attachment",
            MessageType::System => "system",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(MessageType::Text),
            "attachment" => Some(MessageType::Attachment),
            "system" => Some(MessageType::System),
            _ => None,
        }
    }
}

/// Struct per gestire io col client
///
/// `message_id` è generato dal client al momento della composizione ed è la
/// chiave di idempotenza: un replay della stessa create collassa sulla riga
/// già persistita.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessageDTO {
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub group_id: Option<String>,
    pub content: String,
    pub message_type: MessageType,
    pub attachments: Vec<String>,
    pub reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub read_by: Vec<String>,
}

/// DTO per creare un nuovo messaggio
///
/// Il sender non è nel body: arriva sempre dall'autenticazione. Esattamente
/// uno tra `recipient_id` e `group_id` deve essere presente; la verifica è
/// fatta dal domain service.
#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct CreateMessageDTO {
    pub message_id: String,
    pub recipient_id: Option<String>,
    pub group_id: Option<String>,

    #[validate(length(
        min = 1,
        max = 5000,
        message = "Message content must be between 1 and 5000 characters"
    ))]
    pub content: String,

    pub message_type: MessageType,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub reply_to: Option<String>,
}

/// DTO per aggiornare un messaggio (solo campi modificabili)
#[derive(Serialize, Deserialize, Debug, Clone, Validate)]
pub struct UpdateMessageDTO {
    #[validate(length(
        min = 1,
        max = 5000,
        message = "Message content must be between 1 and 5000 characters"
    ))]
    pub content: String,
}

/// Destinazione di una conversazione lato client.
///
/// L'enum rende impossibile costruire un target con entrambi i campi o con
/// nessuno; il domain service rivalida comunque al confine perché i DTO wire
/// portano due campi opzionali.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConversationTarget {
    Direct { recipient_id: String },
    Group { group_id: String },
}

impl ConversationTarget {
    pub fn conversation_id(&self, own_user_id: &str) -> String {
        match self {
            ConversationTarget::Direct { recipient_id } => {
                direct_conversation_id(own_user_id, recipient_id)
            }
            ConversationTarget::Group { group_id } => group_id.clone(),
        }
    }
}

/// Chiave di conversazione stabile per una coppia di utenti, indipendente
/// dall'ordine dei due id.
pub fn direct_conversation_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("direct:{a}:{b}")
    } else {
        format!("direct:{b}:{a}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_conversation_id_is_order_independent() {
        assert_eq!(
            direct_conversation_id("alice", "bob"),
            direct_conversation_id("bob", "alice")
        );
    }

    #[test]
    fn conversation_target_maps_to_stable_conversation_ids() {
        let direct = ConversationTarget::Direct {
            recipient_id: "bob".into(),
        };
        assert_eq!(direct.conversation_id("alice"), "direct:alice:bob");

        let group = ConversationTarget::Group {
            group_id: "team".into(),
        };
        assert_eq!(group.conversation_id("alice"), "team");
    }

    #[test]
    fn message_type_round_trips_through_str() {
        for t in [
            MessageType::Text,
            MessageType::Attachment,
            MessageType::System,
        ] {
            assert_eq!(MessageType::parse(t.as_str()), Some(t));
        }
        assert_eq!(MessageType::parse("video"), None);
    }
}
