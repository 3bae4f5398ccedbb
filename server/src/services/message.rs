//! Message services - Endpoint REST per i messaggi
//!
//! Questi handler condividono il write path con l'handler WebSocket: tutto
//! passa dal domain service, la consegna real-time resta best-effort.

use crate::core::{AppError, AppState, AuthUser};
use crate::entities::Message;
use axum::{
    Extension,
    extract::{Json, Path, Query, State},
};
use protocol::{
    ConversationUpdateDTO, CreateMessageDTO, DirectMessagesQuery, MessageDTO, UpdateMessageDTO,
    WsEvent,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use validator::Validate;

#[derive(Serialize)]
pub struct UnreadCountDTO {
    pub unread: i64,
}

#[instrument(skip(state, current_user, body), fields(user_id = %current_user.user_id, message_id = %body.message_id))]
pub async fn create_message(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<AuthUser>, // ottenuto dall'autenticazione JWT
    Json(body): Json<CreateMessageDTO>,
) -> Result<Json<MessageDTO>, AppError> {
    debug!("Creating message via REST");
    // 1. Persistere tramite il domain service (write path unico, idempotente)
    // 2. Consegna best-effort: sessione live o coda durevole
    // 3. Ritornare il messaggio come persistito
    let message = state.messages.create(&current_user.user_id, body).await?;

    if message.group_id.is_some() {
        crate::ws::deliver_group(&state, &message);
    } else {
        crate::ws::deliver_direct(&state, &message);
    }

    info!("Message created");
    Ok(Json(MessageDTO::from(message)))
}

#[instrument(skip(state, current_user, body), fields(user_id = %current_user.user_id, message_id = %message_id))]
pub async fn edit_message(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
    Extension(current_user): Extension<AuthUser>,
    Json(body): Json<UpdateMessageDTO>,
) -> Result<Json<MessageDTO>, AppError> {
    debug!("Editing message");
    body.validate()?;

    let message = state
        .messages
        .edit(&message_id, &current_user.user_id, &body.content)
        .await?;

    publish_conversation_update(&state, &message);

    info!("Message edited");
    Ok(Json(MessageDTO::from(message)))
}

#[instrument(skip(state, current_user), fields(user_id = %current_user.user_id, message_id = %message_id))]
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
    Extension(current_user): Extension<AuthUser>,
) -> Result<Json<MessageDTO>, AppError> {
    debug!("Deleting message");
    // soft delete: viene restituito lo stato precedente della riga per
    // l'invalidazione delle cache lato client
    let prior = state
        .messages
        .delete(&message_id, &current_user.user_id)
        .await?;

    publish_conversation_update(&state, &prior);

    info!("Message deleted");
    Ok(Json(MessageDTO::from(prior)))
}

#[instrument(skip(state, current_user), fields(user_id = %current_user.user_id, message_id = %message_id))]
pub async fn mark_message_read(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
    Extension(current_user): Extension<AuthUser>,
) -> Result<Json<MessageDTO>, AppError> {
    debug!("Marking message as read");
    let outcome = state
        .messages
        .mark_read(&message_id, &current_user.user_id)
        .await?;

    if outcome.newly_read {
        crate::ws::notify_read_receipt(&state, &outcome.message, &current_user.user_id);
    }

    Ok(Json(MessageDTO::from(outcome.message)))
}

#[instrument(skip(state, current_user), fields(user_id = %current_user.user_id, other_user = %user_id))]
pub async fn list_direct_messages(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<DirectMessagesQuery>,
    Extension(current_user): Extension<AuthUser>,
) -> Result<Json<Vec<MessageDTO>>, AppError> {
    debug!("Fetching direct conversation messages");
    let limit = params.limit.unwrap_or(50);
    let offset = params.offset.unwrap_or(0);

    let messages = state
        .messages
        .list_direct(&current_user.user_id, &user_id, limit, offset)
        .await?;

    info!("Retrieved {} messages for conversation", messages.len());

    let messages_dto: Vec<MessageDTO> = messages.into_iter().map(MessageDTO::from).collect();
    Ok(Json(messages_dto))
}

#[instrument(skip(state, current_user), fields(user_id = %current_user.user_id))]
pub async fn get_unread_count(
    State(state): State<Arc<AppState>>,
    Extension(current_user): Extension<AuthUser>,
) -> Result<Json<UnreadCountDTO>, AppError> {
    let unread = state.messages.unread_count(&current_user.user_id).await?;
    Ok(Json(UnreadCountDTO { unread }))
}

/// Segnala alle sessioni sottoscritte che la conversazione è cambiata
/// (edit o delete). Best-effort: zero sottoscrittori non è un errore.
fn publish_conversation_update(state: &AppState, message: &Message) {
    let conversation_id = message.conversation_id();
    let _ = state.conversations.publish(
        &conversation_id,
        std::sync::Arc::new(WsEvent::ConversationUpdated(ConversationUpdateDTO {
            conversation_id: conversation_id.clone(),
        })),
    );
}
