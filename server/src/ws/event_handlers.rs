//! WebSocket Event Handlers - Handler per eventi dal client

use crate::AppState;
use crate::ws::sessions::InternalSignal;
use crate::ws::utils::{deliver_direct, deliver_group, notify_read_receipt};
use protocol::{ClientEvent, ErrorDTO, TypingDTO, WsEvent};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, instrument, warn};

/// Smista un evento del client.
///
/// Le scritture durevoli passano dal domain service (lo stesso write path
/// delle route REST); la consegna real-time a valle è best-effort e non può
/// far fallire la scrittura già persistita.
#[instrument(skip(state, event, internal_tx), fields(user_id))]
pub async fn process_client_event(
    state: &Arc<AppState>,
    user_id: &str,
    event: ClientEvent,
    internal_tx: &UnboundedSender<InternalSignal>,
) {
    match event {
        ClientEvent::SendMessage(dto) => {
            info!(message_id = %dto.message_id, "Message received from client");
            match state.messages.create(user_id, dto).await {
                Ok(message) => {
                    if message.group_id.is_some() {
                        deliver_group(state, &message);
                    } else {
                        deliver_direct(state, &message);
                    }
                }
                Err(e) => {
                    warn!("Message rejected by domain service: {e}");
                    let _ = internal_tx.send(InternalSignal::Event(WsEvent::Error(ErrorDTO {
                        code: 400,
                        message: e.to_string(),
                    })));
                }
            }
        }

        ClientEvent::MarkRead { message_id } => {
            match state.messages.mark_read(&message_id, user_id).await {
                Ok(outcome) => {
                    // fan-out solo alla prima lettura: il mark-read è idempotente
                    if outcome.newly_read {
                        notify_read_receipt(state, &outcome.message, user_id);
                    }
                }
                Err(e) => {
                    warn!("Mark-read rejected: {e}");
                    let _ = internal_tx.send(InternalSignal::Event(WsEvent::Error(ErrorDTO {
                        code: 404,
                        message: e.to_string(),
                    })));
                }
            }
        }

        ClientEvent::TypingStart { conversation_id } => {
            relay_typing(state, conversation_id, user_id, true);
        }

        ClientEvent::TypingStop { conversation_id } => {
            relay_typing(state, conversation_id, user_id, false);
        }

        ClientEvent::Join { conversation_id } => {
            let _ = internal_tx.send(InternalSignal::Join(conversation_id));
        }

        ClientEvent::Leave { conversation_id } => {
            let _ = internal_tx.send(InternalSignal::Leave(conversation_id));
        }

        // la presenza è già stata rinfrescata dal listen task
        ClientEvent::Heartbeat => {}
    }
}

/// Gli eventi typing sono effimeri: vanno solo alle sessioni sottoscritte
/// alla conversazione e non toccano mai il database.
fn relay_typing(state: &Arc<AppState>, conversation_id: String, user_id: &str, started: bool) {
    let dto = TypingDTO {
        conversation_id: conversation_id.clone(),
        user_id: user_id.to_string(),
    };
    let event = if started {
        WsEvent::TypingStarted(dto)
    } else {
        WsEvent::TypingStopped(dto)
    };

    if state
        .conversations
        .publish(&conversation_id, Arc::new(event))
        .is_err()
    {
        // nessun sottoscrittore: per un evento effimero non è un problema
        info!("Typing event dropped, no subscribers");
    }
}
