//! WebSocket Connection Management - Gestione connessioni WebSocket

use crate::ws::CLIENT_TIMEOUT_SECONDS;
use crate::ws::{broadcast_presence, event_handlers::process_client_event, sessions::InternalSignal};
use crate::AppState;
use axum::extract::ws::Utf8Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use protocol::{ClientEvent, WsEvent};
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::time::{Duration, timeout};
use tokio_stream::StreamMap;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{error, info, instrument, warn};

#[instrument(skip(ws, state), fields(user_id))]
pub async fn handle_socket(ws: WebSocket, state: Arc<AppState>, user_id: String) {
    info!("WebSocket connection established");

    // Dividiamo il WebSocket in due metà: sender e receiver
    let (ws_tx, ws_rx) = ws.split();

    // Canale unbounded per la comunicazione interna: i segnali di join/leave
    // e gli eventi diretti non devono andare persi
    let (int_tx, int_rx) = unbounded_channel::<InternalSignal>();

    // Registriamo la sessione e aggiorniamo subito la presenza: da qui in poi
    // il delivery path considera l'utente raggiungibile
    state.sessions.register_online(&user_id, int_tx.clone());
    state.presence.set_online(&user_id, true);
    broadcast_presence(&state, &user_id, true);

    tokio::spawn(listen_ws(user_id.clone(), ws_rx, int_tx, state.clone()));
    tokio::spawn(write_ws(user_id, ws_tx, int_rx, state));
}

#[instrument(skip(websocket_tx, internal_rx, state), fields(user_id))]
pub async fn write_ws(
    user_id: String,
    mut websocket_tx: SplitSink<WebSocket, Message>,
    mut internal_rx: UnboundedReceiver<InternalSignal>,
    state: Arc<AppState>,
) {
    info!("Write task started");

    // Drain del backlog: una sola volta per riconnessione, mai su heartbeat.
    // Prima i messaggi bufferizzati, poi le notifiche arretrate.
    let backlog = state.message_buffer.drain_for_recipient(&user_id);
    if !backlog.is_empty() {
        info!(count = backlog.len(), "Delivering buffered messages");
        for message in backlog {
            if send_event(&mut websocket_tx, &WsEvent::NewMessage(message))
                .await
                .is_err()
            {
                warn!("Failed to deliver buffered message, closing connection");
                return;
            }
        }
    }

    let notifications = state.notification_buffer.drain_for_recipient(&user_id);
    if !notifications.is_empty() {
        info!(count = notifications.len(), "Delivering buffered notifications");
        for event in notifications {
            if send_event(&mut websocket_tx, &event).await.is_err() {
                warn!("Failed to deliver buffered notification, closing connection");
                return;
            }
        }
    }

    // Le sottoscrizioni partono vuote: il client manda Join per ogni
    // conversazione che vuole seguire (e le ri-manda da solo alla riconnessione)
    let mut stream_map: StreamMap<String, BroadcastStream<Arc<WsEvent>>> = StreamMap::new();

    'external: loop {
        tokio::select! {
            Some((_, result)) = tokio_stream::StreamExt::next(&mut stream_map) => {
                if let Ok(event) = result {
                    if send_event(&mut websocket_tx, event.as_ref()).await.is_err() {
                        warn!("Failed to forward conversation event, closing connection");
                        break 'external;
                    }
                }
            }

            signal = internal_rx.recv() => {
                match signal {
                    Some(InternalSignal::Shutdown) => {
                        info!("Shutdown signal received");
                        break 'external;
                    }
                    Some(InternalSignal::Join(conversation_id)) => {
                        info!(conversation_id, "Adding conversation subscription");
                        let rx = state.conversations.subscribe(&conversation_id);
                        stream_map.insert(conversation_id, BroadcastStream::new(rx));
                    }
                    Some(InternalSignal::Leave(conversation_id)) => {
                        info!(conversation_id, "Removing conversation subscription");
                        stream_map.remove(&conversation_id);
                    }
                    Some(InternalSignal::Event(event)) => {
                        if send_event(&mut websocket_tx, &event).await.is_err() {
                            error!("Failed to send event to client");
                            break 'external;
                        }
                    }
                    None => {
                        info!("Internal channel closed");
                        break 'external; // canale chiuso, quindi listener ws chiuso
                    }
                }
            }
        }
    }

    info!("Write task terminated");
}

#[instrument(skip(websocket_tx, event))]
async fn send_event(
    websocket_tx: &mut SplitSink<WebSocket, Message>,
    event: &WsEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(|e| {
        error!("Failed to serialize event: {:?}", e);
        axum::Error::new(e)
    })?;
    websocket_tx
        .send(Message::Text(Utf8Bytes::from(json)))
        .await
        .map_err(|e| {
            error!("Failed to send event through WebSocket: {:?}", e);
            e
        })
}

#[instrument(skip(websocket_rx, internal_tx, state), fields(user_id))]
pub async fn listen_ws(
    user_id: String,
    mut websocket_rx: SplitStream<WebSocket>,
    internal_tx: UnboundedSender<InternalSignal>,
    state: Arc<AppState>,
) {
    info!("Listen task started");

    let timeout_duration = Duration::from_secs(CLIENT_TIMEOUT_SECONDS);

    loop {
        match timeout(timeout_duration, StreamExt::next(&mut websocket_rx)).await {
            Ok(Some(msg_result)) => {
                let msg = match msg_result {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("WebSocket error: {:?}", e);
                        break;
                    }
                };

                // ogni frame in arrivo è attività del trasporto: rinfresca il TTL
                state.presence.touch(&user_id);

                match msg {
                    Message::Text(text) => {
                        if let Ok(event) = serde_json::from_str::<ClientEvent>(&text) {
                            process_client_event(&state, &user_id, event, &internal_tx).await;
                        } else {
                            warn!("Failed to deserialize client event");
                        }
                    }
                    Message::Close(_) => {
                        info!("Close message received");
                        break;
                    }
                    _ => {}
                }
            }
            Ok(None) => {
                info!("WebSocket stream ended");
                break;
            }
            Err(_) => {
                warn!(timeout_secs = CLIENT_TIMEOUT_SECONDS, "Connection timeout");
                break;
            }
        }
    }

    // Cleanup: la presenza va a offline solo se questa era ancora la
    // sessione corrente (una connessione sovrascritta non deve oscurare
    // quella nuova)
    info!("Cleaning up connection");
    let _ = internal_tx.send(InternalSignal::Shutdown);
    if state.sessions.remove_if_current(&user_id, &internal_tx) {
        state.presence.set_online(&user_id, false);
        broadcast_presence(&state, &user_id, false);
    }
    info!("Listen task terminated");
}
