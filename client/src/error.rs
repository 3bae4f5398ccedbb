//! Errori della libreria client

use thiserror::Error;

/// Tassonomia dei fallimenti lato client.
///
/// Solo `Transient` conta contro il budget di retry dell'outbox; tutto il
/// resto è terminale e arriva al chiamante come operazione rifiutata.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Rete, timeout o errore 5xx del server: ritentabile
    #[error("transient delivery failure: {0}")]
    Transient(String),

    /// Il server ha rifiutato l'operazione (4xx): non ritentabile
    #[error("operation rejected by server ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    /// La connessione WebSocket non è stabilita
    #[error("transport is not connected")]
    NotConnected,

    /// Connessione iniziale fallita (autenticazione rifiutata, timeout):
    /// viene restituito al chiamante, mai ritentato in silenzio
    #[error("transport connect failed: {0}")]
    ConnectFailed(String),

    /// Errore del backing store locale dell'outbox: non fatale per la
    /// composizione, il contenuto resta in memoria
    #[error("outbox storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl ClientError {
    /// Vero solo per i fallimenti che un retry può risolvere.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}
