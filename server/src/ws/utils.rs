//! WebSocket Utilities - Consegna best-effort a valle del write path
//!
//! Tutte le funzioni qui dentro vengono chiamate DOPO che il domain service
//! ha già persistito la mutazione: un fallimento della consegna real-time o
//! del buffering viene loggato e assorbito, mai propagato al chiamante.
//! Perdere la notifica non è perdere il messaggio.

use crate::AppState;
use crate::entities::Message;
use crate::ws::sessions::InternalSignal;
use protocol::{MessageDTO, PresenceDTO, ReadReceiptDTO, WsEvent};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Consegna un messaggio diretto: sessione live se il destinatario è
/// raggiungibile, altrimenti coda durevole.
/// Operazioni:
/// 1. Leggere la presenza del destinatario
/// 2. Se online, inviare NewMessage sul canale della sua sessione
/// 3. Altrimenti (o se l'invio fallisce) bufferizzare nella coda durevole
#[instrument(skip(state, message), fields(message_id = %message.message_id))]
pub fn deliver_direct(state: &AppState, message: &Message) {
    let Some(recipient_id) = message.recipient_id.as_deref() else {
        warn!("deliver_direct called with a group message");
        return;
    };

    let dto = MessageDTO::from(message.clone());

    if state.presence.get_status(recipient_id).is_online
        && state.sessions.send_if_online(
            recipient_id,
            InternalSignal::Event(WsEvent::NewMessage(dto.clone())),
        )
    {
        info!("Message delivered to live session");
        return;
    }

    info!("Recipient unreachable, buffering message");
    state.message_buffer.buffer_for_recipient(recipient_id, dto);
}

/// Consegna un messaggio di gruppo alle sessioni sottoscritte alla
/// conversazione. I membri offline recupereranno dalla history; la
/// membership dei gruppi è un collaboratore esterno.
#[instrument(skip(state, message), fields(message_id = %message.message_id))]
pub fn deliver_group(state: &AppState, message: &Message) {
    let Some(group_id) = message.group_id.as_deref() else {
        warn!("deliver_group called with a direct message");
        return;
    };

    let event = WsEvent::NewMessage(MessageDTO::from(message.clone()));
    match state.conversations.publish(group_id, Arc::new(event)) {
        Ok(n) => info!(receivers = n, "Group message broadcast"),
        Err(_) => info!("No subscribers for group, message reachable via history"),
    }
}

/// Notifica al mittente che il suo messaggio è stato letto; se il mittente è
/// offline la ricevuta finisce nel buffer notifiche (ritenzione più corta).
#[instrument(skip(state, message), fields(message_id = %message.message_id, reader_id))]
pub fn notify_read_receipt(state: &AppState, message: &Message, reader_id: &str) {
    let event = WsEvent::ReadReceipt(ReadReceiptDTO {
        message_id: message.message_id.clone(),
        reader_id: reader_id.to_string(),
    });

    let sender_id = message.sender_id.as_str();
    if state.presence.get_status(sender_id).is_online
        && state
            .sessions
            .send_if_online(sender_id, InternalSignal::Event(event.clone()))
    {
        return;
    }

    state.notification_buffer.buffer_for_recipient(sender_id, event);
}

/// Fan-out del cambio di presenza a tutte le sessioni online.
pub fn broadcast_presence(state: &AppState, user_id: &str, is_online: bool) {
    let status = state.presence.get_status(user_id);
    let reached = state.sessions.broadcast(&WsEvent::PresenceChanged(PresenceDTO {
        user_id: user_id.to_string(),
        is_online,
        last_seen: status.last_seen,
    }));
    info!(reached, "Presence change broadcast");
}
