//! MessageService - Domain service dei messaggi
//!
//! Unico write path per create/edit/delete/mark-read. La persistenza è
//! idempotente sulla chiave generata dal client, quindi un OutboxEntry
//! rigiocato due volte collassa sulla stessa riga.

use crate::domain::DeliveryError;
use crate::entities::Message;
use crate::repositories::{Create, MessageRepository, Read};
use crate::repositories::message::NewMessage;
use chrono::Utc;
use protocol::CreateMessageDTO;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Esito di `mark_read`: il flag dice se l'insieme è cambiato davvero,
/// così il fan-out della ricevuta parte solo alla prima lettura.
pub struct MarkReadOutcome {
    pub message: Message,
    pub newly_read: bool,
}

pub struct MessageService {
    repo: MessageRepository,
}

impl MessageService {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self {
            repo: MessageRepository::new(pool),
        }
    }

    /// Crea (o ritrova, in caso di replay) un messaggio.
    ///
    /// Il sender arriva sempre dall'autenticazione, mai dal body. Il vincolo
    /// "esattamente uno tra recipient_id e group_id" è verificato qui, al
    /// confine del dominio, prima di toccare il database.
    #[instrument(skip(self, dto), fields(sender_id, message_id = %dto.message_id))]
    pub async fn create(
        &self,
        sender_id: &str,
        dto: CreateMessageDTO,
    ) -> Result<Message, DeliveryError> {
        dto.validate()
            .map_err(|e| DeliveryError::InvalidContent(e.to_string()))?;

        match (&dto.recipient_id, &dto.group_id) {
            (Some(_), Some(_)) => {
                warn!("Message targets both a recipient and a group");
                return Err(DeliveryError::InvalidTarget(
                    "a message must target either a recipient or a group, not both",
                ));
            }
            (None, None) => {
                warn!("Message targets neither a recipient nor a group");
                return Err(DeliveryError::InvalidTarget(
                    "a message must target a recipient or a group",
                ));
            }
            _ => {}
        }

        let new_message = NewMessage {
            message_id: dto.message_id,
            sender_id: sender_id.to_string(),
            recipient_id: dto.recipient_id,
            group_id: dto.group_id,
            content: dto.content,
            message_type: dto.message_type,
            attachments: dto.attachments,
            reply_to: dto.reply_to,
            created_at: Utc::now(),
        };

        let message = self.repo.create(&new_message).await?;
        info!("Message persisted");
        Ok(message)
    }

    /// Aggiunge `user_id` all'insieme read-by del messaggio.
    ///
    /// Idempotente: se l'utente ha già letto, nessuna scrittura. L'unione di
    /// insiemi è commutativa, quindi chiamate concorrenti dello stesso utente
    /// sono sicure senza lock aggiuntivi.
    #[instrument(skip(self))]
    pub async fn mark_read(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> Result<MarkReadOutcome, DeliveryError> {
        let mut message = self
            .repo
            .read(&message_id.to_string())
            .await?
            .ok_or(DeliveryError::NotFound)?;

        if message.read_by.iter().any(|reader| reader == user_id) {
            debug!("User already in read-by set, no-op");
            return Ok(MarkReadOutcome {
                message,
                newly_read: false,
            });
        }

        message.read_by.push(user_id.to_string());
        self.repo
            .update_read_by(&message.message_id, &message.read_by)
            .await?;

        debug!("Read receipt recorded");
        Ok(MarkReadOutcome {
            message,
            newly_read: true,
        })
    }

    /// Modifica il contenuto; solo il sender originale può farlo.
    ///
    /// L'autorizzazione è il guard SQL su (message_id, sender_id): zero righe
    /// toccate = operazione rifiutata, senza finestra tra check e update.
    #[instrument(skip(self, new_content))]
    pub async fn edit(
        &self,
        message_id: &str,
        user_id: &str,
        new_content: &str,
    ) -> Result<Message, DeliveryError> {
        if new_content.is_empty() || new_content.len() > 5000 {
            return Err(DeliveryError::InvalidContent(
                "message content must be between 1 and 5000 characters".to_string(),
            ));
        }

        let edited_at = Utc::now();
        let affected = self
            .repo
            .update_content_guarded(message_id, user_id, new_content, &edited_at)
            .await?;

        if affected == 0 {
            warn!("Guarded edit touched no rows");
            return Err(DeliveryError::Unauthorized);
        }

        self.repo
            .read(&message_id.to_string())
            .await?
            .ok_or(DeliveryError::NotFound)
    }

    /// Soft delete, stessa guardia del sender. Restituisce lo stato
    /// precedente della riga per l'invalidazione delle cache del chiamante.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        message_id: &str,
        user_id: &str,
    ) -> Result<Message, DeliveryError> {
        let prior = self
            .repo
            .read(&message_id.to_string())
            .await?
            .ok_or(DeliveryError::NotFound)?;

        let affected = self.repo.soft_delete_guarded(message_id, user_id).await?;
        if affected == 0 {
            warn!("Guarded delete touched no rows");
            return Err(DeliveryError::Unauthorized);
        }

        info!("Message soft-deleted");
        Ok(prior)
    }

    /// Messaggi scambiati tra due utenti, i più recenti per primi.
    pub async fn list_direct(
        &self,
        user_a: &str,
        user_b: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, DeliveryError> {
        let limit = limit.clamp(1, 100);
        let offset = offset.max(0);
        Ok(self.repo.find_direct_pair(user_a, user_b, limit, offset).await?)
    }

    pub async fn unread_count(&self, user_id: &str) -> Result<i64, DeliveryError> {
        Ok(self.repo.unread_count(user_id).await?)
    }

    pub async fn find(&self, message_id: &str) -> Result<Option<Message>, DeliveryError> {
        Ok(self.repo.read(&message_id.to_string()).await?)
    }
}
