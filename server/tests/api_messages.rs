//! Integration tests per gli endpoint REST dei messaggi
//!
//! Test per:
//! - Creazione con insert idempotente sulla chiave generata dal client
//! - Vincolo di mutua esclusività recipient/group al confine del dominio
//! - Idempotenza del mark-read e ricevute concorrenti
//! - Autorizzazione sender-only su edit e delete
//! - Paginazione e conteggio non letti
//!
//! Questi test usano `#[sqlx::test]`, che crea un database SQLite isolato
//! per ogni test e applica le migrations da `migrations/`.

mod common;

use axum::http::StatusCode;
use common::*;
use protocol::{CreateMessageDTO, MessageDTO, MessageType};
use serde_json::json;

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
// Creazione e idempotenza
// ============================================================

#[sqlx::test]
async fn test_create_direct_message_returns_persisted_row(pool: sqlx::SqlitePool) {
    let server = create_test_server(create_test_state(pool));
    let token = create_test_jwt("alice");

    let response = server
        .post("/messages")
        .authorization_bearer(&token)
        .json(&direct_dto("outbox-1", "bob", "ciao"))
        .await;

    response.assert_status(StatusCode::OK);
    let message: MessageDTO = response.json();
    assert_eq!(message.message_id, "outbox-1");
    assert_eq!(message.sender_id, "alice");
    assert_eq!(message.recipient_id.as_deref(), Some("bob"));
    assert_eq!(message.group_id, None);
    assert!(!message.deleted);
    assert!(message.read_by.is_empty());
}

#[sqlx::test]
async fn test_replayed_create_collapses_on_the_same_row(pool: sqlx::SqlitePool) {
    let server = create_test_server(create_test_state(pool));
    let token = create_test_jwt("alice");
    let dto = direct_dto("outbox-replay", "bob", "solo una volta");

    let first: MessageDTO = server
        .post("/messages")
        .authorization_bearer(&token)
        .json(&dto)
        .await
        .json();

    // replay della stessa entry (stessa chiave di idempotenza)
    let second: MessageDTO = server
        .post("/messages")
        .authorization_bearer(&token)
        .json(&dto)
        .await
        .json();

    assert_eq!(first.created_at, second.created_at);

    let listed: Vec<MessageDTO> = server
        .get("/conversations/bob/messages")
        .authorization_bearer(&token)
        .await
        .json();
    assert_eq!(listed.len(), 1);
}

#[sqlx::test]
async fn test_create_rejects_both_targets(pool: sqlx::SqlitePool) {
    let server = create_test_server(create_test_state(pool));
    let token = create_test_jwt("alice");

    let response = server
        .post("/messages")
        .authorization_bearer(&token)
        .json(&json!({
            "message_id": "outbox-bad",
            "recipient_id": "bob",
            "group_id": "team",
            "content": "ambiguo",
            "message_type": "text"
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[sqlx::test]
async fn test_create_rejects_missing_target(pool: sqlx::SqlitePool) {
    let server = create_test_server(create_test_state(pool));
    let token = create_test_jwt("alice");

    let response = server
        .post("/messages")
        .authorization_bearer(&token)
        .json(&json!({
            "message_id": "outbox-bad-2",
            "content": "senza destinazione",
            "message_type": "text"
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[sqlx::test]
async fn test_create_requires_authentication(pool: sqlx::SqlitePool) {
    let server = create_test_server(create_test_state(pool));

    let response = server
        .post("/messages")
        .json(&direct_dto("outbox-noauth", "bob", "ciao"))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

// ============================================================
// Mark-read: idempotenza e concorrenza
// ============================================================

#[sqlx::test]
async fn test_mark_read_twice_leaves_a_single_entry(pool: sqlx::SqlitePool) {
    let server = create_test_server(create_test_state(pool));
    let alice = create_test_jwt("alice");
    let bob = create_test_jwt("bob");

    server
        .post("/messages")
        .authorization_bearer(&alice)
        .json(&direct_dto("outbox-read", "bob", "leggimi"))
        .await
        .assert_status(StatusCode::OK);

    let first: MessageDTO = server
        .post("/messages/outbox-read/read")
        .authorization_bearer(&bob)
        .await
        .json();
    assert_eq!(first.read_by, vec!["bob".to_string()]);

    let second: MessageDTO = server
        .post("/messages/outbox-read/read")
        .authorization_bearer(&bob)
        .await
        .json();
    assert_eq!(second.read_by, vec!["bob".to_string()]);
}

#[sqlx::test]
async fn test_concurrent_mark_read_collapses_to_one_entry(pool: sqlx::SqlitePool) {
    let state = create_test_state(pool);
    let server = create_test_server(state.clone());
    let alice = create_test_jwt("alice");

    server
        .post("/messages")
        .authorization_bearer(&alice)
        .json(&direct_dto("outbox-race", "bob", "leggimi due volte"))
        .await
        .assert_status(StatusCode::OK);

    // due mark-read dello stesso utente in parallelo, direttamente sul
    // domain service: l'unione di insiemi è commutativa e idempotente
    let state_a = state.clone();
    let state_b = state.clone();
    let (a, b) = tokio::join!(
        async move { state_a.messages.mark_read("outbox-race", "bob").await },
        async move { state_b.messages.mark_read("outbox-race", "bob").await },
    );
    a.expect("first mark_read failed");
    b.expect("second mark_read failed");

    let message = state
        .messages
        .find("outbox-race")
        .await
        .unwrap()
        .expect("message should exist");
    assert_eq!(message.read_by, vec!["bob".to_string()]);
}

#[sqlx::test]
async fn test_mark_read_unknown_message_is_not_found(pool: sqlx::SqlitePool) {
    let server = create_test_server(create_test_state(pool));
    let bob = create_test_jwt("bob");

    let response = server
        .post("/messages/missing-id/read")
        .authorization_bearer(&bob)
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

// ============================================================
// Edit e delete: autorizzazione sender-only via guarded update
// ============================================================

#[sqlx::test]
async fn test_edit_by_non_sender_is_forbidden_and_leaves_content(pool: sqlx::SqlitePool) {
    let state = create_test_state(pool);
    let server = create_test_server(state.clone());
    let alice = create_test_jwt("alice");
    let mallory = create_test_jwt("mallory");

    server
        .post("/messages")
        .authorization_bearer(&alice)
        .json(&direct_dto("outbox-edit", "bob", "originale"))
        .await
        .assert_status(StatusCode::OK);

    let response = server
        .patch("/messages/outbox-edit")
        .authorization_bearer(&mallory)
        .json(&json!({ "content": "manomesso" }))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let message = state
        .messages
        .find("outbox-edit")
        .await
        .unwrap()
        .expect("message should exist");
    assert_eq!(message.content, "originale");
    assert!(message.edited_at.is_none());
}

#[sqlx::test]
async fn test_edit_by_sender_updates_content(pool: sqlx::SqlitePool) {
    let server = create_test_server(create_test_state(pool));
    let alice = create_test_jwt("alice");

    server
        .post("/messages")
        .authorization_bearer(&alice)
        .json(&direct_dto("outbox-edit-ok", "bob", "prima"))
        .await
        .assert_status(StatusCode::OK);

    let edited: MessageDTO = server
        .patch("/messages/outbox-edit-ok")
        .authorization_bearer(&alice)
        .json(&json!({ "content": "dopo" }))
        .await
        .json();

    assert_eq!(edited.content, "dopo");
    assert!(edited.edited_at.is_some());
}

#[sqlx::test]
async fn test_delete_returns_prior_state_and_soft_deletes(pool: sqlx::SqlitePool) {
    let state = create_test_state(pool);
    let server = create_test_server(state.clone());
    let alice = create_test_jwt("alice");

    server
        .post("/messages")
        .authorization_bearer(&alice)
        .json(&direct_dto("outbox-del", "bob", "da cancellare"))
        .await
        .assert_status(StatusCode::OK);

    let prior: MessageDTO = server
        .delete("/messages/outbox-del")
        .authorization_bearer(&alice)
        .await
        .json();
    // lo stato restituito è quello PRIMA della cancellazione
    assert!(!prior.deleted);
    assert_eq!(prior.content, "da cancellare");

    // la riga resta, marcata come soft-deleted
    let stored = state
        .messages
        .find("outbox-del")
        .await
        .unwrap()
        .expect("row should survive soft delete");
    assert!(stored.deleted);
}

#[sqlx::test]
async fn test_delete_by_non_sender_is_forbidden(pool: sqlx::SqlitePool) {
    let server = create_test_server(create_test_state(pool));
    let alice = create_test_jwt("alice");
    let mallory = create_test_jwt("mallory");

    server
        .post("/messages")
        .authorization_bearer(&alice)
        .json(&direct_dto("outbox-del-2", "bob", "mio"))
        .await
        .assert_status(StatusCode::OK);

    server
        .delete("/messages/outbox-del-2")
        .authorization_bearer(&mallory)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

// ============================================================
// Letture: paginazione e conteggio non letti
// ============================================================

#[sqlx::test]
async fn test_list_direct_paginates_newest_first(pool: sqlx::SqlitePool) {
    let server = create_test_server(create_test_state(pool));
    let alice = create_test_jwt("alice");

    for i in 0..5 {
        server
            .post("/messages")
            .authorization_bearer(&alice)
            .json(&direct_dto(&format!("outbox-page-{i}"), "bob", &format!("msg {i}")))
            .await
            .assert_status(StatusCode::OK);
    }

    let page: Vec<MessageDTO> = server
        .get("/conversations/bob/messages")
        .add_query_param("limit", 2)
        .add_query_param("offset", 0)
        .authorization_bearer(&alice)
        .await
        .json();
    assert_eq!(page.len(), 2);

    let rest: Vec<MessageDTO> = server
        .get("/conversations/bob/messages")
        .add_query_param("limit", 10)
        .add_query_param("offset", 2)
        .authorization_bearer(&alice)
        .await
        .json();
    assert_eq!(rest.len(), 3);
}

#[sqlx::test]
async fn test_unread_count_tracks_read_receipts(pool: sqlx::SqlitePool) {
    let server = create_test_server(create_test_state(pool));
    let alice = create_test_jwt("alice");
    let bob = create_test_jwt("bob");

    server
        .post("/messages")
        .authorization_bearer(&alice)
        .json(&direct_dto("outbox-unread-1", "bob", "uno"))
        .await
        .assert_status(StatusCode::OK);
    server
        .post("/messages")
        .authorization_bearer(&alice)
        .json(&direct_dto("outbox-unread-2", "bob", "due"))
        .await
        .assert_status(StatusCode::OK);

    let count: serde_json::Value = server
        .get("/messages/unread/count")
        .authorization_bearer(&bob)
        .await
        .json();
    assert_eq!(count["unread"], 2);

    server
        .post("/messages/outbox-unread-1/read")
        .authorization_bearer(&bob)
        .await
        .assert_status(StatusCode::OK);

    let count: serde_json::Value = server
        .get("/messages/unread/count")
        .authorization_bearer(&bob)
        .await
        .json();
    assert_eq!(count["unread"], 1);
}
