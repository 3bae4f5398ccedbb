//! Services module - Coordinatore per tutti i service handler HTTP
//!
//! Ogni modulo gestisce gli endpoint HTTP per una specifica funzionalità.
//! Le route REST sono anche il bersaglio del replay dell'outbox client.

pub mod message;

// Re-exports per facilitare l'import
pub use message::{
    create_message, delete_message, edit_message, get_unread_count, list_direct_messages,
    mark_message_read,
};

use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse};
use std::sync::Arc;

/// Root endpoint - health check
pub async fn root(State(_state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, "Server is running!")
}
