//! MessageRepository - Repository per la gestione dei messaggi

use super::{Create, Read};
use crate::entities::Message;
use chrono::{DateTime, Utc};
use protocol::MessageType;
use sqlx::{Error, SqlitePool};
use tracing::instrument;

/// Dati di inserimento di un nuovo messaggio, già validati dal domain service.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: Option<String>,
    pub group_id: Option<String>,
    pub content: String,
    pub message_type: MessageType,
    pub attachments: Vec<String>,
    pub reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
}

// MESSAGE REPO
pub struct MessageRepository {
    connection_pool: SqlitePool,
}

impl MessageRepository {
    pub fn new(connection_pool: SqlitePool) -> Self {
        Self { connection_pool }
    }

    /// Get paginated messages exchanged between two users, newest first.
    ///
    /// Entrambe le direzioni della coppia sono incluse; le righe soft-deleted
    /// restano nel risultato (il chiamante rende il tombstone).
    #[instrument(skip(self))]
    pub async fn find_direct_pair(
        &self,
        user_a: &str,
        user_b: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, Error> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT
                message_id,
                sender_id,
                recipient_id,
                group_id,
                content,
                message_type,
                attachments,
                reply_to,
                created_at,
                edited_at,
                deleted,
                read_by
            FROM messages
            WHERE (sender_id = ?1 AND recipient_id = ?2)
               OR (sender_id = ?2 AND recipient_id = ?1)
            ORDER BY created_at DESC
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.connection_pool)
        .await?;

        Ok(messages)
    }

    /// Conta i messaggi diretti indirizzati all'utente, non cancellati, il cui
    /// insieme read_by non contiene l'utente stesso.
    #[instrument(skip(self))]
    pub async fn unread_count(&self, user_id: &str) -> Result<i64, Error> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM messages
            WHERE recipient_id = ?1
              AND deleted = 0
              AND instr(read_by, '"' || ?1 || '"') = 0
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.connection_pool)
        .await?;

        Ok(count)
    }

    /// Update del contenuto con guardia su (message_id, sender_id).
    ///
    /// Zero righe toccate significa: messaggio inesistente, sender diverso o
    /// messaggio già cancellato. L'autorizzazione è il guard stesso, senza
    /// read-then-check.
    ///
    /// # Returns
    /// Numero di righe aggiornate (0 o 1)
    #[instrument(skip(self, content))]
    pub async fn update_content_guarded(
        &self,
        message_id: &str,
        sender_id: &str,
        content: &str,
        edited_at: &DateTime<Utc>,
    ) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET content = ?1, edited_at = ?2
            WHERE message_id = ?3 AND sender_id = ?4 AND deleted = 0
            "#,
        )
        .bind(content)
        .bind(edited_at)
        .bind(message_id)
        .bind(sender_id)
        .execute(&self.connection_pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Soft delete con la stessa guardia su (message_id, sender_id).
    ///
    /// # Returns
    /// Numero di righe aggiornate (0 o 1)
    #[instrument(skip(self))]
    pub async fn soft_delete_guarded(
        &self,
        message_id: &str,
        sender_id: &str,
    ) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET deleted = 1
            WHERE message_id = ?1 AND sender_id = ?2
            "#,
        )
        .bind(message_id)
        .bind(sender_id)
        .execute(&self.connection_pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Persiste l'insieme read_by aggiornato.
    #[instrument(skip(self, read_by))]
    pub async fn update_read_by(&self, message_id: &str, read_by: &[String]) -> Result<(), Error> {
        let encoded = serde_json::to_string(read_by)
            .map_err(|e| Error::Encode(Box::new(e)))?;

        sqlx::query("UPDATE messages SET read_by = ?1 WHERE message_id = ?2")
            .bind(encoded)
            .bind(message_id)
            .execute(&self.connection_pool)
            .await?;

        Ok(())
    }
}

impl Create<Message, NewMessage> for MessageRepository {
    /// Insert idempotente: un replay con lo stesso message_id collassa sulla
    /// riga esistente, che viene riletta e restituita.
    async fn create(&self, data: &NewMessage) -> Result<Message, Error> {
        let attachments = serde_json::to_string(&data.attachments)
            .map_err(|e| Error::Encode(Box::new(e)))?;

        sqlx::query(
            r#"
            INSERT INTO messages (
                message_id, sender_id, recipient_id, group_id, content,
                message_type, attachments, reply_to, created_at, deleted, read_by
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, '[]')
            ON CONFLICT(message_id) DO NOTHING
            "#,
        )
        .bind(&data.message_id)
        .bind(&data.sender_id)
        .bind(&data.recipient_id)
        .bind(&data.group_id)
        .bind(&data.content)
        .bind(data.message_type.as_str())
        .bind(attachments)
        .bind(&data.reply_to)
        .bind(data.created_at)
        .execute(&self.connection_pool)
        .await?;

        self.read(&data.message_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }
}

impl Read<Message, String> for MessageRepository {
    async fn read(&self, id: &String) -> Result<Option<Message>, Error> {
        let message = sqlx::query_as::<_, Message>(
            r#"
            SELECT
                message_id,
                sender_id,
                recipient_id,
                group_id,
                content,
                message_type,
                attachments,
                reply_to,
                created_at,
                edited_at,
                deleted,
                read_by
            FROM messages
            WHERE message_id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.connection_pool)
        .await?;

        Ok(message)
    }
}
