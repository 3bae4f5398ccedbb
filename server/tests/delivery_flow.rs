//! Integration tests per il delivery path: presenza, buffering e drain
//!
//! Test per:
//! - Scenario end-to-end: destinatario offline -> buffer -> riconnessione ->
//!   drain esattamente una volta
//! - Default offline della presenza
//! - Consegna diretta alla sessione live quando il destinatario è online
//! - Buffer notifiche parallelo per le ricevute di lettura

mod common;

use axum::http::StatusCode;
use common::*;
use protocol::{CreateMessageDTO, MessageType, WsEvent};
use server::ws::sessions::InternalSignal;
use tokio::sync::mpsc;

fn direct_dto(message_id: &str, recipient: &str, content: &str) -> CreateMessageDTO {
    CreateMessageDTO {
        message_id: message_id.to_string(),
        recipient_id: Some(recipient.to_string()),
        group_id: None,
        content: content.to_string(),
        message_type: MessageType::Text,
        attachments: vec![],
        reply_to: None,
    }
}

// ============================================================
// Scenario A: mittente scrive a destinatario offline
// ============================================================

#[sqlx::test]
async fn test_offline_recipient_message_is_buffered_then_drained_once(pool: sqlx::SqlitePool) {
    let state = create_test_state(pool);
    let server = create_test_server(state.clone());
    let alice = create_test_jwt("alice");

    // bob è offline: nessun record di presenza, nessuna sessione
    server
        .post("/messages")
        .authorization_bearer(&alice)
        .json(&direct_dto("outbox-buffered", "bob", "ci sei?"))
        .await
        .assert_status(StatusCode::OK);

    // il messaggio è durevole E bufferizzato per la riconnessione
    assert_eq!(state.message_buffer.recipient_count("bob"), 1);

    // bob si riconnette: il drain restituisce esattamente quel messaggio...
    let drained = state.message_buffer.drain_for_recipient("bob");
    assert_eq!(drained.len(), 1);
    assert_eq!(drained[0].message_id, "outbox-buffered");

    // ...e la coda per bob ora è vuota
    assert_eq!(state.message_buffer.recipient_count("bob"), 0);
    assert!(state.message_buffer.drain_for_recipient("bob").is_empty());
}

// ============================================================
// Presenza: l'assenza di un record è "offline", mai un errore
// ============================================================

#[sqlx::test]
async fn test_presence_defaults_to_offline_for_unknown_users(pool: sqlx::SqlitePool) {
    let state = create_test_state(pool);

    let status = state.presence.get_status("never-seen");
    assert!(!status.is_online);
}

// ============================================================
// Destinatario online: consegna alla sessione live, niente buffer
// ============================================================

#[sqlx::test]
async fn test_online_recipient_receives_on_live_session(pool: sqlx::SqlitePool) {
    let state = create_test_state(pool);
    let server = create_test_server(state.clone());
    let alice = create_test_jwt("alice");

    // simula la connessione di bob: sessione registrata + presenza online
    let (tx, mut rx) = mpsc::unbounded_channel::<InternalSignal>();
    state.sessions.register_online("bob", tx);
    state.presence.set_online("bob", true);

    server
        .post("/messages")
        .authorization_bearer(&alice)
        .json(&direct_dto("outbox-live", "bob", "eccomi"))
        .await
        .assert_status(StatusCode::OK);

    // il messaggio arriva sul canale della sessione, non nel buffer
    match rx.recv().await {
        Some(InternalSignal::Event(WsEvent::NewMessage(message))) => {
            assert_eq!(message.message_id, "outbox-live");
        }
        other => panic!("expected NewMessage event, got {:?}", discriminant_name(&other)),
    }
    assert_eq!(state.message_buffer.recipient_count("bob"), 0);
}

// ============================================================
// Ricevute di lettura: mittente offline -> buffer notifiche
// ============================================================

#[sqlx::test]
async fn test_read_receipt_for_offline_sender_lands_in_notification_buffer(
    pool: sqlx::SqlitePool,
) {
    let state = create_test_state(pool);
    let server = create_test_server(state.clone());
    let alice = create_test_jwt("alice");
    let bob = create_test_jwt("bob");

    server
        .post("/messages")
        .authorization_bearer(&alice)
        .json(&direct_dto("outbox-receipt", "bob", "letto?"))
        .await
        .assert_status(StatusCode::OK);

    // alice è offline quando bob legge
    server
        .post("/messages/outbox-receipt/read")
        .authorization_bearer(&bob)
        .await
        .assert_status(StatusCode::OK);

    let notifications = state.notification_buffer.drain_for_recipient("alice");
    assert_eq!(notifications.len(), 1);
    match &notifications[0] {
        WsEvent::ReadReceipt(receipt) => {
            assert_eq!(receipt.message_id, "outbox-receipt");
            assert_eq!(receipt.reader_id, "bob");
        }
        other => panic!("expected ReadReceipt, got {other:?}"),
    }

    // il mark-read è idempotente: una seconda lettura non rigenera la ricevuta
    server
        .post("/messages/outbox-receipt/read")
        .authorization_bearer(&bob)
        .await
        .assert_status(StatusCode::OK);
    assert!(state.notification_buffer.drain_for_recipient("alice").is_empty());
}

fn discriminant_name(signal: &Option<InternalSignal>) -> &'static str {
    match signal {
        Some(InternalSignal::Shutdown) => "Shutdown",
        Some(InternalSignal::Join(_)) => "Join",
        Some(InternalSignal::Leave(_)) => "Leave",
        Some(InternalSignal::Event(_)) => "Event(other)",
        None => "None",
    }
}
