//! Message entity - Entità messaggio

use chrono::{DateTime, Utc};
use protocol::{MessageDTO, MessageType};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Message {
    /// Id generato dal client alla composizione: è la chiave di idempotenza
    pub message_id: String,
    pub sender_id: String,
    /// Esattamente uno tra recipient_id e group_id è valorizzato
    pub recipient_id: Option<String>,
    pub group_id: Option<String>,
    pub content: String,
    pub message_type: MessageType,
    pub attachments: Vec<String>,
    pub reply_to: Option<String>,
    // il server riceve una stringa iso8601 che serde converte in DateTime UTC
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    /// Soft delete: le righe non vengono mai cancellate fisicamente
    pub deleted: bool,
    /// Insieme degli utenti che hanno letto il messaggio, senza duplicati
    pub read_by: Vec<String>,
}

impl Message {
    /// Chiave di conversazione del messaggio (gruppo o coppia ordinata).
    pub fn conversation_id(&self) -> String {
        match (&self.recipient_id, &self.group_id) {
            (Some(recipient), _) => protocol::direct_conversation_id(&self.sender_id, recipient),
            (None, Some(group)) => group.clone(),
            // escluso dal CHECK a livello di schema
            (None, None) => String::new(),
        }
    }
}

// Le colonne attachments e read_by sono liste serializzate come JSON TEXT,
// quindi il mapping dalla riga è manuale.
impl sqlx::FromRow<'_, SqliteRow> for Message {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let message_type_raw: String = row.try_get("message_type")?;
        let message_type = MessageType::parse(&message_type_raw).ok_or_else(|| {
            sqlx::Error::ColumnDecode {
                index: "message_type".into(),
                source: format!("unknown message type: {message_type_raw}").into(),
            }
        })?;

        let attachments_raw: String = row.try_get("attachments")?;
        let attachments: Vec<String> =
            serde_json::from_str(&attachments_raw).map_err(|e| sqlx::Error::ColumnDecode {
                index: "attachments".into(),
                source: Box::new(e),
            })?;

        let read_by_raw: String = row.try_get("read_by")?;
        let read_by: Vec<String> =
            serde_json::from_str(&read_by_raw).map_err(|e| sqlx::Error::ColumnDecode {
                index: "read_by".into(),
                source: Box::new(e),
            })?;

        Ok(Message {
            message_id: row.try_get("message_id")?,
            sender_id: row.try_get("sender_id")?,
            recipient_id: row.try_get("recipient_id")?,
            group_id: row.try_get("group_id")?,
            content: row.try_get("content")?,
            message_type,
            attachments,
            reply_to: row.try_get("reply_to")?,
            created_at: row.try_get("created_at")?,
            edited_at: row.try_get("edited_at")?,
            deleted: row.try_get("deleted")?,
            read_by,
        })
    }
}

impl From<Message> for MessageDTO {
    fn from(value: Message) -> Self {
        Self {
            message_id: value.message_id,
            sender_id: value.sender_id,
            recipient_id: value.recipient_id,
            group_id: value.group_id,
            content: value.content,
            message_type: value.message_type,
            attachments: value.attachments,
            reply_to: value.reply_to,
            created_at: value.created_at,
            edited_at: value.edited_at,
            deleted: value.deleted,
            read_by: value.read_by,
        }
    }
}
