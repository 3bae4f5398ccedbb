//! Errori del domain service

use thiserror::Error;

/// Esiti fallimentari del write path durevole.
///
/// `Store` è l'unico retryable: il chiamante (outbox/sync manager lato
/// client) decide i retry, il service non ritenta mai internamente. Gli
/// altri sono terminali e arrivano al chiamante come operazione rifiutata.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("message not found")]
    NotFound,

    #[error("sender mismatch on guarded update")]
    Unauthorized,

    #[error("invalid conversation target: {0}")]
    InvalidTarget(&'static str),

    #[error("invalid message content: {0}")]
    InvalidContent(String),

    #[error("message persistence failed")]
    Store(#[from] sqlx::Error),
}

impl DeliveryError {
    /// Vero solo per i fallimenti del backing store, gli unici che un
    /// replay può sperare di risolvere.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Store(_))
    }
}
