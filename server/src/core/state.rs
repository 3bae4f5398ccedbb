//! Application State - Stato globale dell'applicazione
//!
//! Contiene il domain service, le code di consegna, il presence store e le
//! mappe delle sessioni real-time condivise tra route, middleware e task.

use crate::delivery::{DeliveryQueue, PresenceStore};
use crate::domain::MessageService;
use crate::ws::conversations::ConversationMap;
use crate::ws::sessions::SessionMap;
use chrono::Duration;
use protocol::{MessageDTO, WsEvent};
use sqlx::SqlitePool;

/// Stato globale dell'applicazione condiviso tra tutte le route e i task
pub struct AppState {
    /// Domain service: unico write path per le mutazioni dei messaggi
    pub messages: MessageService,

    /// Coda durevole per-destinatario dei messaggi diretti non consegnati
    pub message_buffer: DeliveryQueue<MessageDTO>,

    /// Buffer parallelo per le notifiche (ricevute di lettura) non consegnate
    pub notification_buffer: DeliveryQueue<WsEvent>,

    /// Presenza degli utenti, TTL breve rinfrescato dall'attività del trasporto
    pub presence: PresenceStore,

    /// Mappa concorrente delle sessioni online con i loro canali WebSocket
    pub sessions: SessionMap,

    /// Canali broadcast per-conversazione delle sessioni sottoscritte
    pub conversations: ConversationMap,

    /// Secret key per JWT token
    pub jwt_secret: String,
}

impl AppState {
    /// Crea una nuova istanza di AppState con le finestre di ritenzione di
    /// default (7 giorni messaggi, 3 giorni notifiche, 5 minuti presenza).
    ///
    /// # Arguments
    /// * `pool` - Pool di connessioni SQLite condiviso
    /// * `jwt_secret` - Chiave segreta per la firma dei token JWT
    pub fn new(pool: SqlitePool, jwt_secret: String) -> Self {
        Self::with_retention(
            pool,
            jwt_secret,
            Duration::days(7),
            Duration::days(3),
            Duration::minutes(5),
        )
    }

    /// Variante con finestre di ritenzione esplicite, usata da `main` (config)
    /// e dai test che devono osservare le scadenze.
    pub fn with_retention(
        pool: SqlitePool,
        jwt_secret: String,
        message_retention: Duration,
        notification_retention: Duration,
        presence_ttl: Duration,
    ) -> Self {
        Self {
            messages: MessageService::new(pool),
            message_buffer: DeliveryQueue::new(message_retention),
            notification_buffer: DeliveryQueue::new(notification_retention),
            presence: PresenceStore::new(presence_ttl),
            sessions: SessionMap::new(),
            conversations: ConversationMap::new(),
            jwt_secret,
        }
    }
}
