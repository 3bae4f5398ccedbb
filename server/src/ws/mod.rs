//! WebSocket Module - Gestione WebSocket per comunicazione real-time
//!
//! Questo modulo gestisce le connessioni WebSocket per la comunicazione in
//! tempo reale tra client e server. Include:
//! - Gestione upgrade HTTP -> WebSocket
//! - Gestione connessioni (split sender/receiver, drain del backlog)
//! - Handler per eventi WebSocket (messaggi, ricevute, typing, join/leave)
//! - Utility per la consegna best-effort

pub mod connection;
pub mod conversations;
pub mod event_handlers;
pub mod sessions;
pub mod utils;

// Re-exports pubblici
pub use connection::handle_socket;
pub use utils::{broadcast_presence, deliver_direct, deliver_group, notify_read_receipt};

use crate::core::{AppState, AuthUser};
use axum::{
    Extension,
    extract::{State, ws::WebSocketUpgrade},
    response::Response,
};
use std::sync::Arc;

/// Timeout di inattività oltre il quale la connessione viene chiusa; il
/// client manda heartbeat ben dentro questa finestra.
pub const CLIENT_TIMEOUT_SECONDS: u64 = 120;

/// Capacità dei canali broadcast per-conversazione
pub const BROADCAST_CHANNEL_CAPACITY: usize = 256;

/// Entry point per gestire richieste di upgrade WebSocket
/// Operazioni:
/// 1. Estrarre l'utente autenticato dal middleware JWT
/// 2. Eseguire upgrade HTTP -> WebSocket
/// 3. Passare la connessione ad handle_socket
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<AuthUser>, // ottenuto dall'autenticazione JWT
) -> Response {
    let user_id = current_user.user_id;

    // Gestisce automaticamente l'upgrade a WebSocket.
    // Se l'upgrade fallisce, ritorna un errore; altrimenti restituisce la
    // nuova connessione al client.
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}
